use super::*;
use crate::dummy::{DummyModule, DummyOs, ElfBuilder, PeBuilder};
use crate::os::ThreadHandle;
use crate::image::ImageKind;
use crate::rtti::{ITANIUM_X64, MSVC_X64, MSVC_X86};
use crate::types::{size, PageProtection, RegionKind};
use crate::version::VersionList;

const PID: Pid = 0x1f00;
const BASE: u64 = 0x0040_0000;
const TIMESTAMP: u32 = 0x4f3b_1a2c;

fn versions() -> VersionList {
    VersionList::from(vec![VersionDescriptor::new(
        "v0.34.11 SDL",
        TIMESTAMP,
        Address::from(0x0040_0000_u64),
    )
    .address("world", Address::from(0x013c_2d60_u64))
    .offset("unit_pos", 0x48)])
}

fn image(timestamp: u32) -> PeBuilder {
    PeBuilder::new(32)
        .timestamp(timestamp)
        .code_section("TEXT", 0x1000, 0x4000)
        .data_section("DATA", 0x5000, 0x4000)
        .section("RDATA", 0x9000, 0x1000)
}

fn process_at(base: u64) -> DummyOs {
    let mut os = DummyOs::new(PID);
    os.map_image(
        "game.exe",
        "C:\\games\\df_34_11\\game.exe",
        Address::from(base),
        &image(TIMESTAMP),
    );
    os.add_thread(4, 4);
    os.add_thread(100, PID);
    os.add_thread(101, PID);
    os.add_thread(200, 0x2000);
    os.add_thread(102, PID);
    os.add_heap(Address::from(0xA0000_u64), size::kb(64));
    os.add_heap(Address::from(0xB0000_u64), size::kb(64));
    os
}

fn process() -> DummyOs {
    process_at(BASE)
}

fn named(ranges: &[MemoryRange], start: u64) -> Option<String> {
    ranges
        .iter()
        .find(|r| r.start == Address::from(start))
        .map(|r| r.name.clone())
}

#[test]
fn identified() {
    let versions = versions();
    let ctx = ProcessContext::new(process(), &versions);

    assert_eq!(ctx.state(), ContextState::Identified);
    assert!(ctx.is_identified());
    assert_eq!(ctx.pid(), PID);
    assert_eq!(ctx.base(), Some(Address::from(BASE)));
    assert_eq!(ctx.image().unwrap().sections.len(), 3);
    assert_eq!(ctx.thread_ids(), &[100, 101, 102]);
    assert_eq!(ctx.threads().len(), 3);
    assert_eq!(ctx.rtti_layout(), MSVC_X86);
    assert_eq!(ctx.identify_error(), None);

    let descriptor = ctx.descriptor().unwrap();
    assert_eq!(descriptor.owner(), Some(PID));
    assert_eq!(descriptor.get_address("world"), Some(Address::from(0x013c_2d60_u64)));
}

#[test]
fn descriptor_is_rebased_privately() {
    let versions = versions();
    let ctx = ProcessContext::new(process_at(0x0100_0000), &versions);

    assert!(ctx.is_identified());
    assert_eq!(
        ctx.descriptor().unwrap().get_address("world"),
        Some(Address::from(0x01fc_2d60_u64))
    );
    assert_eq!(ctx.descriptor().unwrap().get_offset("unit_pos"), Some(0x48));

    let template = versions.lookup_by_timestamp(TIMESTAMP).unwrap();
    assert_eq!(template.get_address("world"), Some(Address::from(0x013c_2d60_u64)));
    assert_eq!(template.owner(), None);
}

#[test]
fn module_enumeration_failure() {
    let mut os = process();
    os.faults.modules = true;
    let counters = os.counters();

    let mut ctx = ProcessContext::new(os, &versions());
    assert_eq!(ctx.state(), ContextState::Uninitialized);
    assert_eq!(
        ctx.identify_error(),
        Some(Error(ErrorOrigin::OsLayer, ErrorKind::ModuleNotFound))
    );
    assert_eq!(ctx.base(), None);
    assert!(ctx.image().is_none());
    assert!(ctx.threads().is_empty());
    assert_eq!(
        ctx.primary_module_path().unwrap_err().kind(),
        ErrorKind::Uninitialized
    );

    // raw memory access is still available
    let value: u16 = ctx.read(Address::from(BASE)).unwrap();
    assert_eq!(value, 0x5a4d);

    drop(ctx);
    assert_eq!(counters.outstanding(), 0);
}

#[test]
fn header_read_failure() {
    let mut os = DummyOs::new(PID);
    os.add_module(DummyModule {
        base: Address::from(BASE),
        size: size::kb(64),
        name: "game.exe".to_string(),
        path: "C:\\games\\game.exe".to_string(),
    });
    os.add_thread(100, PID);
    let counters = os.counters();

    let mut ctx = ProcessContext::new(os, &versions());
    assert_eq!(ctx.state(), ContextState::AttachedUnidentified);
    assert_eq!(ctx.base(), Some(Address::from(BASE)));
    assert!(ctx.image().is_none());
    assert!(ctx.descriptor().is_none());
    assert!(ctx.thread_ids().is_empty());
    assert_eq!(ctx.rtti_layout(), RttiLayout::host());
    assert_eq!(ctx.primary_module_path().unwrap(), "C:\\games");

    drop(ctx);
    assert_eq!(counters.outstanding(), 0);
}

#[test]
fn section_read_failure() {
    let mut os = process();
    // declare far more sections than there is mapped memory behind the header
    os.write(Address::from(BASE + 0x86), &0xffff_u16).unwrap();
    let counters = os.counters();

    let ctx = ProcessContext::new(os, &versions());
    assert_eq!(ctx.state(), ContextState::AttachedUnidentified);
    assert!(ctx.image().is_none());
    assert!(ctx.descriptor().is_none());

    drop(ctx);
    assert_eq!(counters.outstanding(), 0);
}

#[test]
fn descriptor_match_failure() {
    let os = process();
    let counters = os.counters();

    let ctx = ProcessContext::new(os, &VersionList::new());
    assert_eq!(ctx.state(), ContextState::AttachedUnidentified);
    assert_eq!(
        ctx.identify_error(),
        Some(Error(ErrorOrigin::Version, ErrorKind::NotFound))
    );
    assert!(ctx.image().is_some());
    assert!(ctx.descriptor().is_none());
    assert!(ctx.threads().is_empty());
    assert_eq!(counters.snapshots(), 0);

    drop(ctx);
    assert_eq!(counters.outstanding(), 0);
}

#[test]
fn thread_snapshot_failure_keeps_descriptor() {
    let mut os = process();
    os.faults.thread_snapshot = true;
    let counters = os.counters();

    let ctx = ProcessContext::new(os, &versions());
    assert_eq!(ctx.state(), ContextState::AttachedUnidentified);
    assert_eq!(
        ctx.identify_error(),
        Some(Error(ErrorOrigin::Threads, ErrorKind::UnableToCreateSnapshot))
    );
    assert!(ctx.descriptor().is_some());
    assert!(ctx.thread_ids().is_empty());

    drop(ctx);
    assert_eq!(counters.outstanding(), 0);
}

#[test]
fn thread_first_entry_failure() {
    let mut os = process();
    os.faults.thread_first = true;
    let counters = os.counters();

    let ctx = ProcessContext::new(os, &versions());
    assert_eq!(ctx.state(), ContextState::AttachedUnidentified);
    assert!(ctx.descriptor().is_some());

    drop(ctx);
    assert_eq!(counters.outstanding(), 0);
}

#[test]
fn thread_open_failure_is_not_fatal() {
    let mut os = process();
    os.faults.open_thread = vec![101];
    let counters = os.counters();

    let ctx = ProcessContext::new(os, &versions());
    assert!(ctx.is_identified());
    assert_eq!(ctx.thread_ids(), &[100, 101, 102]);
    assert_eq!(
        ctx.threads().iter().map(|t| t.id()).collect::<Vec<_>>(),
        vec![100, 102]
    );
    assert_eq!(counters.open_threads(), 2);

    drop(ctx);
    assert_eq!(counters.outstanding(), 0);
}

#[test]
fn section_and_heap_names() {
    let versions = versions();
    let mut ctx = ProcessContext::new(process(), &versions);
    let counters = ctx.os().counters();

    let ranges = ctx.list_memory_ranges();
    assert_eq!(named(&ranges, BASE).unwrap(), "game.exe");
    assert_eq!(named(&ranges, 0x0040_1000).unwrap(), "game.exe : TEXT");
    assert_eq!(named(&ranges, 0x0040_5000).unwrap(), "game.exe : DATA");
    assert_eq!(named(&ranges, 0x0040_9000).unwrap(), "game.exe : RDATA");
    assert_eq!(named(&ranges, 0xA0000).unwrap(), "HEAP 0");
    assert_eq!(named(&ranges, 0xB0000).unwrap(), "HEAP 1");
    assert_eq!(counters.heap_buffers(), 0);
    assert_eq!(counters.heap_buffers_acquired(), 1);

    for pair in ranges.windows(2) {
        assert!(pair[0].end <= pair[1].start);
    }
}

#[test]
fn ranges_are_not_cached() {
    let versions = versions();
    let mut ctx = ProcessContext::new(process(), &versions);

    let before = ctx.list_memory_ranges();
    ctx.os_mut().map_region(
        Address::from(0x0030_0000_u64),
        size::kb(8),
        PageProtection::EXECUTE_READWRITE,
        RegionKind::Private,
    );
    let after = ctx.list_memory_ranges();

    assert_eq!(after.len(), before.len() + 1);
    let fresh = find_range(&after, Address::from(0x0030_1000_u64)).unwrap();
    assert!(fresh.read && fresh.write && fresh.execute);
    assert!(fresh.name.is_empty());
}

#[test]
fn heap_enumeration_disabled() {
    let versions = versions();
    let os = process();
    let counters = os.counters();
    let mut ctx =
        ProcessContext::with_config(os, &versions, ContextConfig::new().enumerate_heaps(false));

    let ranges = ctx.list_memory_ranges();
    assert_eq!(named(&ranges, 0xB0000).unwrap(), "");
    assert_eq!(counters.heap_buffers_acquired(), 0);
}

#[test]
fn heap_query_failure_degrades() {
    let versions = versions();
    let mut os = process();
    os.faults.heap_query = true;
    let counters = os.counters();
    let mut ctx = ProcessContext::new(os, &versions);

    let ranges = ctx.list_memory_ranges();
    assert_eq!(named(&ranges, 0xB0000).unwrap(), "");
    assert_eq!(named(&ranges, 0x0040_1000).unwrap(), "game.exe : TEXT");
    assert_eq!(counters.heap_buffers(), 0);
}

#[test]
fn valid_addresses() {
    let versions = versions();
    let mut ctx = ProcessContext::new(process(), &versions);

    assert!(ctx.is_valid_address(Address::from(0x0040_1234_u64)));
    assert!(ctx.is_valid_address(Address::from(0xB0010_u64)));
    assert!(!ctx.is_valid_address(Address::from(0x0050_0000_u64)));
    assert!(!ctx.is_valid_address(Address::NULL));
}

fn write_class(os: &mut DummyOs, vtable: u64, locator: u64, descriptor: u64, name: &[u8]) {
    os.write(Address::from(vtable - 4), &(locator as u32)).unwrap();
    os.write(Address::from(locator + 0xc), &(descriptor as u32)).unwrap();
    os.write_raw(Address::from(descriptor + 8), name).unwrap();
}

#[test]
fn class_names() {
    let versions = versions();
    let mut os = process();
    // vtables live in RDATA, objects on the heap
    write_class(&mut os, 0x0040_9104, 0x0040_9800, 0x0040_9900, b".?AVunit@df@@\0");
    os.write(Address::from(0xA0010_u64), &0x0040_9104_u32).unwrap();

    let mut ctx = ProcessContext::new(os, &versions);
    assert_eq!(ctx.resolve_class_name(Address::from(0xA0010_u64)).unwrap(), "unit@df");

    // cached by vtable, the chain is not followed again
    ctx.write(Address::from(0x0040_9900_u64 + 8), b".?AVitem@df@@\0").unwrap();
    assert_eq!(ctx.read_class_name(Address::from(0x0040_9104_u64)).unwrap(), "unit@df");

    ctx.clear_class_names();
    assert_eq!(ctx.read_class_name(Address::from(0x0040_9104_u64)).unwrap(), "item@df");
}

#[test]
fn class_name_failures_are_not_cached() {
    let versions = versions();
    let mut ctx = ProcessContext::new(process(), &versions);
    let vtable = Address::from(0x0040_9104_u64);

    // the locator pointer is zero and points into unmapped memory
    let err = ctx.read_class_name(vtable).unwrap_err();
    assert_eq!(err.origin(), ErrorOrigin::Rtti);

    ctx.write(vtable - 4u64, &0x0040_9800_u32).unwrap();
    ctx.write(Address::from(0x0040_980c_u64), &0x0040_9900_u32).unwrap();
    ctx.write(Address::from(0x0040_9908_u64), b".?AVunit@df@@\0").unwrap();
    assert_eq!(ctx.read_class_name(vtable).unwrap(), "unit@df");

    let err = ctx.resolve_class_name(Address::from(0x0050_0000_u64)).unwrap_err();
    assert_eq!(err.origin(), ErrorOrigin::Rtti);
    assert_eq!(err.kind(), ErrorKind::UnableToReadMemory);
}

#[test]
fn rtti_override() {
    let versions = versions();
    let config = ContextConfig::new().rtti(MSVC_X64);
    let ctx = ProcessContext::with_config(process(), &versions, config);
    assert_eq!(ctx.rtti_layout(), MSVC_X64);
}

#[test]
fn pe32_plus_selects_x64_rtti() {
    let mut os = DummyOs::new(PID);
    os.map_image(
        "game64.exe",
        "/opt/df/game64.exe",
        Address::from(0x1_4000_0000_u64),
        &PeBuilder::new(64).code_section(".text", 0x1000, 0x1000),
    );
    let ctx = ProcessContext::new(os, &versions());
    assert_eq!(ctx.rtti_layout(), MSVC_X64);
    assert_eq!(ctx.state(), ContextState::AttachedUnidentified);
}

#[test]
fn elf_image_is_named_but_not_identified() {
    let mut os = DummyOs::new(PID);
    let elf = ElfBuilder::new(64)
        .code_segment(0x1000, 0x2345)
        .rodata_segment(0x4000, 0x800)
        .data_segment(0x5d48, 0x3b8);
    os.map_image("df", "/opt/df/libs/df", Address::from(0x1000_0000_u64), &elf);
    os.add_thread(100, PID);

    let mut ctx = ProcessContext::new(os, &versions());
    assert_eq!(ctx.state(), ContextState::AttachedUnidentified);
    assert_eq!(
        ctx.identify_error(),
        Some(Error(ErrorOrigin::Version, ErrorKind::NotFound))
    );
    assert_eq!(ctx.image().unwrap().kind(), ImageKind::Elf64);
    assert_eq!(ctx.rtti_layout(), ITANIUM_X64);
    assert!(ctx.descriptor().is_none());

    let ranges = ctx.list_memory_ranges();
    assert_eq!(named(&ranges, 0x1000_0000).unwrap(), "df");
    assert_eq!(named(&ranges, 0x1000_1000).unwrap(), "df : .text");
    assert_eq!(named(&ranges, 0x1000_4000).unwrap(), "df : .rodata");
    assert_eq!(named(&ranges, 0x1000_5000).unwrap(), "df : .data");

    let text = find_range(&ranges, Address::from(0x1000_2000_u64)).unwrap();
    assert!(text.read && text.execute && !text.write);
}

#[test]
fn module_paths() {
    let versions = versions();
    let mut ctx = ProcessContext::new(process(), &versions);
    assert_eq!(ctx.primary_module_file().unwrap(), "C:\\games\\df_34_11\\game.exe");
    assert_eq!(ctx.primary_module_path().unwrap(), "C:\\games\\df_34_11");

    let mut os = DummyOs::new(PID);
    os.map_image("df", "/opt/df/libs/df", Address::from(BASE), &image(0));
    let mut ctx = ProcessContext::new(os, &versions);
    assert_eq!(ctx.primary_module_path().unwrap(), "/opt/df/libs");

    let mut os = DummyOs::new(PID);
    os.map_image("df", "df.exe", Address::from(BASE), &image(0));
    let mut ctx = ProcessContext::new(os, &versions);
    assert_eq!(ctx.primary_module_path().unwrap(), "df.exe");

    ctx.os_mut().faults.module_file_name = true;
    assert_eq!(
        ctx.primary_module_file().unwrap_err().kind(),
        ErrorKind::ModuleNotFound
    );
}

#[test]
fn resources_released_when_identified() {
    let versions = versions();
    let os = process();
    let counters = os.counters();

    let mut ctx = ProcessContext::new(os, &versions);
    assert_eq!(counters.open_threads(), 3);
    let _ = ctx.list_memory_ranges();
    drop(ctx);

    assert_eq!(counters.outstanding(), 0);
}

#[test]
fn state_display() {
    assert_eq!(ContextState::Identified.to_string(), "identified");
    assert_eq!(
        ContextState::AttachedUnidentified.to_string(),
        "attached (unidentified)"
    );
}
