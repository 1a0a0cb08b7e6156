#[cfg(windows)]
fn main() {
    use clap::*;
    use log::Level;

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

    let mut ctx = memscope_win32::attach_with_config(&versions, config);
    println!("pid {}: {}", ctx.pid(), ctx.state());
    if let Some(base) = ctx.base() {
        println!("primary module at {:x}", base);
    }
    if let Ok(path) = ctx.primary_module_path() {
        println!("module directory: {}", path);
    }
    if let Some(descriptor) = ctx.descriptor() {
        println!("version: {}", descriptor.name);
    }
    println!("threads: {:?}", ctx.thread_ids());

    for range in ctx.list_memory_ranges() {
        println!("{}", range);
    }
}

#[cfg(not(windows))]
fn main() {
    eprintln!("this example only runs on windows");
}
