//! Voltage RegMap Demo
//!
//! Builds a two-model inverter catalog, simulates a device with an in-memory
//! register image and runs a few update cycles against it.
//!
//! Usage: cargo run --bin demo [device_code]
//! Example: cargo run --bin demo 0x0d06

use std::sync::Arc;

use voltage_regmap::{
    BankKind, CatalogEntry, ComponentProbe, DataType, DerivedField, DeviceCatalog, DeviceLimits,
    IdentificationPlan, LookupTable, MemoryTransport, RegisterSchema, ScanExecutor, ScanPlan,
    ScanWindow, SchemaSet, Topology, UpdateOrchestrator,
};

const HYBRID_CODE: u16 = 0x0d0f;
const STRING_CODE: u16 = 0x0d06;

fn device_type_code() -> RegisterSchema {
    RegisterSchema::new("device_type_code", BankKind::Input, 5000, DataType::U16)
}

fn serial_number() -> RegisterSchema {
    RegisterSchema::new("serial_number", BankKind::Input, 4990, DataType::Utf8).with_length(10)
}

fn nominal_output() -> RegisterSchema {
    RegisterSchema::new("nominal_active_power", BankKind::Input, 5001, DataType::U16).with_scale(0.1)
}

fn mppt_count() -> RegisterSchema {
    RegisterSchema::new("mppt_count", BankKind::Input, 5048, DataType::U16)
}

fn mppt_voltage() -> RegisterSchema {
    RegisterSchema::new("mppt_voltage", BankKind::Input, 5011, DataType::U16).with_scale(0.1)
}

fn clock_part(key: &str, address: u16) -> RegisterSchema {
    RegisterSchema::new(key, BankKind::Holding, address, DataType::U16)
}

fn schema_set(limits: &DeviceLimits) -> Result<SchemaSet, Box<dyn std::error::Error>> {
    let run_state: LookupTable = [(0x0000, "Run"), (0x8000, "Stop"), (0x1300, "Key Stop"), (0x5500, "Fault")]
        .into_iter()
        .collect();
    let alarms: LookupTable = [(1, "grid_overvoltage"), (2, "grid_undervoltage"), (4, "over_temperature")]
        .into_iter()
        .collect();

    let mut schemas = vec![
        RegisterSchema::new("daily_output_energy", BankKind::Input, 5003, DataType::U16).with_scale(0.1),
        RegisterSchema::new("total_output_energy", BankKind::Input, 5004, DataType::U32),
        RegisterSchema::new("internal_temperature", BankKind::Input, 5008, DataType::S16).with_scale(0.1),
        RegisterSchema::new("total_active_power", BankKind::Input, 5031, DataType::U32),
        RegisterSchema::new("grid_frequency", BankKind::Input, 5036, DataType::U16).with_scale(0.1),
        RegisterSchema::new("alarms", BankKind::Input, 5045, DataType::U16).with_bit_flags(alarms),
        RegisterSchema::new("run_state", BankKind::Holding, 13001, DataType::U16).with_lookup(run_state),
        RegisterSchema::new("battery_power", BankKind::Input, 13022, DataType::U16)
            .applicable_to([HYBRID_CODE]),
        RegisterSchema::new("battery_level", BankKind::Input, 13023, DataType::U16).with_scale(0.1),
    ];
    schemas.extend(RegisterSchema::group_family(&mppt_voltage(), 2, 4));
    for (i, key) in ["year", "month", "day", "hour", "minute", "second"].into_iter().enumerate() {
        schemas.push(clock_part(key, 5000 + i as u16));
    }

    let battery: Vec<RegisterSchema> = schemas
        .iter()
        .filter(|s| s.key.starts_with("battery_"))
        .cloned()
        .collect();
    let main: Vec<RegisterSchema> = schemas
        .iter()
        .filter(|s| !s.key.starts_with("battery_"))
        .cloned()
        .collect();

    let set = SchemaSet::new(schemas, ScanPlan::from_schemas(&main, limits))
        .with_battery_plan(ScanPlan::from_schemas(&battery, limits))
        .with_derived(DerivedField::timestamp(
            "device_time",
            ["year", "month", "day", "hour", "minute", "second"],
        ));
    set.validate(limits)?;
    Ok(set)
}

fn catalog(limits: &DeviceLimits) -> Result<DeviceCatalog, Box<dyn std::error::Error>> {
    let identification = IdentificationPlan::new(
        ScanPlan::from(vec![ScanWindow::input(4989, 12)]),
        vec![serial_number(), device_type_code(), nominal_output()],
        "device_type_code",
    )
    .with_serial_key("serial_number")
    .with_nominal_output_key("nominal_active_power");

    let set = Arc::new(schema_set(limits)?);
    let catalog = DeviceCatalog::new(identification)
        .with_entry(
            CatalogEntry::new(HYBRID_CODE, "SH5.0RT", Topology::Hybrid, Arc::clone(&set))
                .with_component_probe(ComponentProbe::new(ScanWindow::input(5047, 1), mppt_count()), 4),
        )
        .with_entry(CatalogEntry::new(STRING_CODE, "SG5.0RS", Topology::StringOnly, set).with_components(2));
    catalog.validate(limits)?;
    Ok(catalog)
}

fn simulated_device(code: u16) -> MemoryTransport {
    let mut transport = MemoryTransport::new();
    transport.put(&device_type_code(), i64::from(code));
    transport.put_text(&serial_number(), "A2231508812");
    transport.put(&nominal_output(), 50);
    transport.put(&mppt_count(), 3);

    let image: [(BankKind, u16, i64, DataType); 11] = [
        (BankKind::Input, 5003, 184, DataType::U16),
        (BankKind::Input, 5004, 98_213, DataType::U32),
        (BankKind::Input, 5008, -52, DataType::S16),
        (BankKind::Input, 5031, 3_120, DataType::U32),
        (BankKind::Input, 5036, 500, DataType::U16),
        (BankKind::Input, 5045, 0b101, DataType::U16),
        (BankKind::Holding, 13001, 0x0000, DataType::U16),
        (BankKind::Input, 13022, 1_450, DataType::U16),
        (BankKind::Input, 13023, 873, DataType::U16),
        (BankKind::Holding, 5000, 24, DataType::U16),
        (BankKind::Holding, 5001, 6, DataType::U16),
    ];
    for (bank, address, raw, data_type) in image {
        transport.put(&RegisterSchema::new("", bank, address, data_type), raw);
    }
    transport.write_registers(BankKind::Holding, 5002, &[17, 14, 5, 30]);
    transport.write_registers(BankKind::Input, 5011, &[3_512, 0, 3_498, 0, 3_120, 0, 0, 0]);
    transport
}

fn parse_code(arg: &str) -> Option<u16> {
    match arg.strip_prefix("0x").or_else(|| arg.strip_prefix("0X")) {
        Some(hex) => u16::from_str_radix(hex, 16).ok(),
        None => arg.parse().ok(),
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    println!("🚀 Voltage RegMap v{} Demo", voltage_regmap::VERSION);
    println!("=============================\n");

    let code = match std::env::args().nth(1) {
        Some(arg) => parse_code(&arg).ok_or_else(|| format!("invalid device code '{}'", arg))?,
        None => HYBRID_CODE,
    };

    // =========================================================================
    // Part 1: Catalog
    // =========================================================================
    println!("📚 Part 1: Device Catalog");
    println!("-------------------------");

    let limits = DeviceLimits::new().with_max_read_registers(100);
    let catalog = Arc::new(catalog(&limits)?);
    for code in catalog.codes() {
        if let Some(entry) = catalog.lookup(code) {
            let set = &entry.schema_set;
            println!(
                "  {:#06x} {} ({}): {} fields, {} + {} windows",
                code,
                entry.name,
                entry.topology,
                set.schemas.len(),
                set.plan.len(),
                set.battery_plan.len()
            );
        }
    }

    // =========================================================================
    // Part 2: Update cycles
    // =========================================================================
    println!("\n🔌 Part 2: Update Cycles (simulated device {:#06x})", code);
    println!("---------------------------------------------------");

    let executor = ScanExecutor::new().with_limits(limits);
    let mut orchestrator = UpdateOrchestrator::with_executor(simulated_device(code), catalog, executor);

    for _ in 0..2 {
        match orchestrator.update().await {
            Ok(snapshot) => {
                println!("  ✅ Cycle {}: {} fields from {}", snapshot.cycle, snapshot.len(), snapshot.device);
            }
            Err(e) => {
                println!("  ⚠️  Update failed: {}", e);
                println!("\n🎉 Demo completed! (no snapshot published)");
                return Ok(());
            }
        }
    }

    // =========================================================================
    // Part 3: Snapshot
    // =========================================================================
    println!("\n📊 Part 3: Published Snapshot");
    println!("-----------------------------");

    if let Some(snapshot) = orchestrator.current() {
        if let Some(device) = orchestrator.device() {
            println!("  Serial: {}", device.serial.as_deref().unwrap_or("-"));
            println!("  Nominal output: {:?} kW", device.nominal_output);
        }
        for key in snapshot.keys() {
            if let Some(value) = snapshot.get(key) {
                println!("    {:<24} {:<10} {}", key, value.type_name(), value);
            }
        }
    }

    let stats = orchestrator.stats();
    let transport = orchestrator.transport();
    println!("\n  📈 Statistics:");
    println!(
        "    Cycles: {}, successes: {}, failures: {}, cancelled: {}",
        stats.cycles, stats.successes, stats.failures, stats.cancelled
    );
    println!(
        "    Reads: {}, sessions opened: {}, closed: {}",
        transport.requests().len(),
        transport.connect_count(),
        transport.close_count()
    );

    println!("\n🎉 Demo completed!");
    Ok(())
}
