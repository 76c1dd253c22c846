//! Integration tests for the ASIM debugging runtime.
//! Exercises loader, listing map, inspector and screen together on the mock engine.

use asim_core::screen::{self, PALETTE_OFFSET};
use asim_core::srec::{encode_data_record, encode_start_record};
use asim_core::{
    BreakpointManager, Encoding, Engine, Listing, MemoryManager, MockEngine, Rgb, SessionConfig, WatchList,
};
use std::io::Write;
use tempfile::NamedTempFile;

fn image_file(records: &[String]) -> NamedTempFile {
    let mut file = NamedTempFile::new().expect("temp file");
    writeln!(file, "S0030000FC").unwrap();
    for record in records {
        writeln!(file, "{}", record).unwrap();
    }
    file
}

#[test]
fn test_encoded_image_loads_into_engine() {
    let payload = b"HELLO\0";
    let image = image_file(&[
        encode_data_record(0x9000, payload).unwrap(),
        encode_data_record(0x8000, &[0x4E, 0x71, 0x4E, 0x75]).unwrap(),
        encode_start_record(0x8000),
    ]);

    let engine = MockEngine::new();
    let mut breakpoints = BreakpointManager::new();
    let entry = asim_core::srec::load_file(image.path(), &engine, &mut breakpoints, &SessionConfig::default())
        .expect("image should load");

    assert_eq!(entry.address, 0x8000);
    assert!(entry.explicit);
    assert_eq!(engine.read_block(0x9000, payload.len()).unwrap(), payload);
    assert_eq!(engine.read_registers().pc, 0x8000);
    assert_eq!(engine.read_registers().sp(), 0x9200);
    assert_eq!(engine.breakpoints().len(), 1);

    let memory = MemoryManager::new();
    assert_eq!(
        memory.decode(&engine, 0x9000, Encoding::NullTerminatedString).unwrap(),
        "HELLO"
    );
    assert_eq!(memory.decode(&engine, 0x8000, Encoding::HexLong).unwrap(), "4E714E75");
}

#[test]
fn test_image_without_start_uses_base() {
    let image = image_file(&[encode_data_record(0x8000, &[0x4E, 0x71]).unwrap()]);
    let engine = MockEngine::new();
    let mut breakpoints = BreakpointManager::new();
    let entry = asim_core::srec::load_file(image.path(), &engine, &mut breakpoints, &SessionConfig::default())
        .unwrap();

    assert_eq!(entry.address, 0x8000);
    assert!(!entry.explicit);
    assert!(engine.breakpoints().is_empty());
}

#[test]
fn test_listing_symbols_drive_watches() {
    let mut listing_file = NamedTempFile::new().unwrap();
    write!(
        listing_file,
        "00:00008000 303C0005\t     2: main:  move.w #5,d0\n\
         00:00008004 0000002A\t     3: value: dc.l 42\n\
         \n\
         Symbols by name:\n\
         main                             A:00008000\n\
         value                            A:00008004\n"
    )
    .unwrap();
    let listing = Listing::from_file(listing_file.path()).unwrap();
    assert_eq!(listing.line_for(0x8004), Some(3));

    let engine = MockEngine::new();
    engine.write_block(0x8004, &[0, 0, 0, 42]).unwrap();

    let mut watches = WatchList::new();
    for (name, address) in &listing.symbols {
        watches.watch_symbol(name, *address);
    }
    let value = watches.iter().find(|v| v.name == "value").map(|v| v.id).unwrap();
    watches.set_encoding(value, Encoding::SignedLong);

    let evaluated = watches.refresh_all(&engine, &MemoryManager::new());
    let by_name = |name: &str| evaluated.iter().find(|v| v.name == name).unwrap().last_value.clone();
    assert_eq!(by_name("value"), "42");
    assert_eq!(by_name("main"), "0");
    assert_eq!(watches.get(value).unwrap().last_value, "42");
}

#[test]
fn test_screen_compose_from_loaded_image() {
    let config = SessionConfig::default().screen;
    let palette_base = config.base_address + PALETTE_OFFSET;
    let image = image_file(&[
        encode_data_record(palette_base + 3, &[0xFF, 0x80, 0x00]).unwrap(),
        encode_data_record(config.base_address, &[1, 1, 0, 1]).unwrap(),
    ]);

    let engine = MockEngine::new();
    let mut breakpoints = BreakpointManager::new();
    asim_core::srec::load_file(image.path(), &engine, &mut breakpoints, &SessionConfig::default()).unwrap();

    let frame = screen::compose(&engine, &config, config.base_address).unwrap();
    assert_eq!(frame.pixels.len(), 256 * 256);
    assert_eq!(frame.pixel(0, 0), Some(Rgb::new(0xFF, 0x80, 0x00)));
    assert_eq!(frame.pixel(2, 0), Some(Rgb::BLACK));
    assert_eq!(frame.pixel(3, 0), Some(Rgb::new(0xFF, 0x80, 0x00)));
}

#[test]
fn test_dump_marks_stack_row() {
    let engine = MockEngine::new();
    engine.reset(0x8000, 0x9200).unwrap();
    let rows = MemoryManager::new().dump(&engine, 0x9200, 8, engine.read_registers().sp());

    assert_eq!(rows.len(), 8);
    assert_eq!(rows[0].address, 0x9200 - 16);
    let marked: Vec<u32> = rows.iter().filter(|r| r.contains_sp).map(|r| r.address).collect();
    assert_eq!(marked, vec![0x9200]);
    assert!(rows[4].render().ends_with("<- SP"));
}
