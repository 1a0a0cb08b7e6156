#[cfg(target_os = "linux")]
fn main() {
    use clap::*;
    use log::{info, Level};

    use memscope::prelude::v1::*;

    let matches = App::new("attach_self example")
        .version(crate_version!())
        .arg(Arg::with_name("verbose").short("v").multiple(true))
        .arg(
            Arg::with_name("versions")
                .long("versions")
                .short("f")
                .takes_value(true),
        )
        .arg(Arg::with_name("no-heaps").long("no-heaps"))
        .get_matches();

    match matches.occurrences_of("verbose") {
        1 => simple_logger::init_with_level(Level::Warn).unwrap(),
        2 => simple_logger::init_with_level(Level::Info).unwrap(),
        3 => simple_logger::init_with_level(Level::Debug).unwrap(),
        4 => simple_logger::init_with_level(Level::Trace).unwrap(),
        _ => simple_logger::init_with_level(Level::Error).unwrap(),
    }

    let versions = match matches.value_of("versions") {
        Some(path) => VersionList::from_toml_file(path).unwrap(),
        None => VersionList::new(),
    };
    let config = ContextConfig::new().enumerate_heaps(!matches.is_present("no-heaps"));

    // keep a second thread alive so the thread list is not trivial
    let (tx, rx) = std::sync::mpsc::channel::<()>();
    let worker = std::thread::spawn(move || rx.recv().ok());

    let mut ctx = memscope_procfs::attach_with_config(&versions, config).unwrap();
    println!("pid {}: {}", ctx.pid(), ctx.state());
    if let Some(base) = ctx.base() {
        println!("primary module at {:x}", base);
    }
    if let Ok(path) = ctx.primary_module_path() {
        println!("module directory: {}", path);
    }

    let pid = ctx.pid();
    match thread_ids(ctx.os_mut(), pid) {
        Ok(ids) => println!("threads: {:?}", ids),
        Err(err) => info!("unable to list threads: {}", err),
    }

    for range in ctx.list_memory_ranges() {
        println!("{}", range);
    }

    drop(tx);
    worker.join().ok();
}

#[cfg(not(target_os = "linux"))]
fn main() {
    eprintln!("this example only runs on linux");
}
