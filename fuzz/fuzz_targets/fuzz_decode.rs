#![no_main]

use arbitrary::Arbitrary;
use libfuzzer_sys::fuzz_target;
use voltage_regmap::{
    BankKind, DataType, Decoder, DeviceScope, LookupTable, RegisterSchema, ScanWindow,
};

#[derive(Debug, Arbitrary)]
struct FieldInput {
    address: u16,
    kind: u8,
    length: u8,
    scale: Option<i8>,
    group: Option<u8>,
    flags: bool,
}

#[derive(Debug, Arbitrary)]
struct Input {
    start: u16,
    count: u8,
    words: Vec<u16>,
    fields: Vec<FieldInput>,
    component_count: u8,
}

fuzz_target!(|input: Input| {
    let table: LookupTable = [(1, "a"), (2, "b"), (0x8000, "c")].into_iter().collect();
    let window = ScanWindow::input(input.start, u16::from(input.count));

    let schemas: Vec<RegisterSchema> = input
        .fields
        .iter()
        .take(64)
        .enumerate()
        .map(|(i, f)| {
            let data_type = match f.kind % 5 {
                0 => DataType::U16,
                1 => DataType::S16,
                2 => DataType::U32,
                3 => DataType::S32,
                _ => DataType::Utf8,
            };
            let mut schema = RegisterSchema::new(format!("f{i}"), BankKind::Input, f.address, data_type);
            if data_type == DataType::Utf8 {
                schema = schema.with_length(u16::from(f.length));
            }
            if let Some(scale) = f.scale {
                schema = schema.with_scale(f64::from(scale) / 10.0);
            }
            if let Some(group) = f.group {
                schema = schema.in_group(u32::from(group));
            }
            if f.flags {
                schema = schema.with_bit_flags(table.clone());
            } else if f.kind % 7 == 0 {
                schema = schema.with_lookup(table.clone());
            }
            schema
        })
        .collect();

    // arbitrary word slices, including ones shorter than the window, must never panic
    let scope = DeviceScope::device(1, u32::from(input.component_count));
    let _ = Decoder::decode_scoped(&input.words, &window, &schemas, &scope);
});
