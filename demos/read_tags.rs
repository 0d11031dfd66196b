//! Example: Reading and writing Logix tags
//!
//! Run with: cargo run --example read_tags -- 192.168.1.10
//!
//! This example demonstrates:
//! - Connecting and reading the controller identity
//! - Reading and writing atomic tags
//! - Reading a user-defined structure
//! - Batching tags into a group read
//! - Subscribing tags to the scan loop

use std::sync::Arc;
use std::time::Duration;

use enip_cip::cip::DataType;
use enip_cip::{Controller, ControllerConfig, Tag, TagEvent, TagGroup, TagValue, TemplateDefinition};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> enip_cip::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let host = std::env::args().nth(1).unwrap_or_else(|| "192.168.1.10".to_string());

    // =========================================================================
    // Connect to PLC
    // =========================================================================

    let plc = Controller::new(
        ControllerConfig::new()
            .with_slot(0)
            .with_scan_rate(Duration::from_millis(250)),
    );
    plc.connect(&host).await?;

    let props = plc.properties();
    println!("=== Controller ===\n");
    println!("Name:    {}", props.identity.product_name);
    println!("Version: {}", props.identity.version());
    println!("Serial:  {:08X}", props.identity.serial_number);
    println!("Faulted: {}", props.faults.faulted);
    println!("Clock:   {}", plc.read_wall_clock().await?);

    // =========================================================================
    // Atomic tags
    // =========================================================================

    println!("\n=== Atomic Tags ===\n");

    let counter = Arc::new(Tag::new("counter")?);
    plc.read_tag(&counter, None).await?;
    println!("counter = {:?}", counter.controller_value());

    let setpoint = Arc::new(Tag::builder("setpoint").datatype(DataType::REAL).build()?);
    plc.write_tag(&setpoint, Some(TagValue::Real(72.5)), None).await?;
    println!("setpoint <- 72.5");

    // Bit 3 of a DINT
    let alarm = Arc::new(Tag::new("alarm_word.3")?);
    plc.read_tag(&alarm, None).await?;
    println!("alarm_word.3 = {:?}", alarm.controller_value());

    // =========================================================================
    // Structures
    // =========================================================================

    println!("\n=== Structures ===\n");

    plc.register_template(
        TemplateDefinition::new("Motor")
            .member("running", DataType::BOOL)
            .member("speed", DataType::REAL)
            .member("name", "STRING"),
    )?;
    let motor = Arc::new(Tag::new("Program:MainProgram.motor")?);
    plc.read_tag(&motor, None).await?;
    if let Some(TagValue::Struct(value)) = motor.controller_value() {
        for (member, value) in value.members() {
            println!("motor.{member} = {value}");
        }
    }

    // =========================================================================
    // Group read
    // =========================================================================

    println!("\n=== Group Read ===\n");

    let mut group = TagGroup::new();
    for i in 0..4 {
        group.add(Arc::new(Tag::new(format!("line[{i}]"))?));
    }
    plc.read_tag_group(&group).await?;
    for tag in group.iter() {
        println!("{} = {:?}", tag.name(), tag.controller_value());
    }

    // =========================================================================
    // Scanning
    // =========================================================================

    println!("\n=== Scanning (5 s) ===\n");

    let mut events = counter.subscribe();
    plc.subscribe(counter.clone());
    let scanner = plc.clone();
    let scan = tokio::spawn(async move { scanner.scan().await });

    let watch = async {
        while let Ok(event) = events.recv().await {
            if let TagEvent::Changed { name, value, previous } = event {
                println!("{name}: {previous} -> {value}");
            }
        }
    };
    let _ = tokio::time::timeout(Duration::from_secs(5), watch).await;

    plc.pause_scan();
    let _ = scan.await;
    plc.disconnect().await
}
