//! Instrument Comm Demo
//!
//! Walks a live instrument through the typical call sequence: read a BCD
//! value from the first register, read a raw u16, then send a write-32
//! device command, printing per-attempt notifications along the way.
//!
//! Usage: cargo run --bin demo --features serial [port] [slave_addr]
//! Example: cargo run --bin demo --features serial /dev/ttyUSB0 1

use std::sync::Arc;
use std::time::Duration;

use instrument_comm::{
    constants::{exception_description, FC_WRITE_MULTIPLE_REGISTERS},
    set_notify, ByteOrder, Exchange, ExchangeConfig, FloatBitsFormat, ModbusClient, ProtocolFault,
    SerialConfig, SerialEndpoint,
};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt::init();

    let mut args = std::env::args().skip(1);
    let port = args.next().unwrap_or_else(|| "/dev/ttyUSB0".to_string());
    let addr: u8 = args.next().as_deref().unwrap_or("1").parse()?;

    println!("🔌 Instrument Comm v{} Demo", instrument_comm::VERSION);
    println!("port={port} slave={addr}");

    set_notify(|event| {
        println!(
            "  attempt {} on {:?} took {:?}, {} byte response",
            event.attempt,
            event.port,
            event.duration,
            event.response.len()
        );
    });

    let endpoint = Arc::new(SerialEndpoint::open(&port, &SerialConfig::default())?);
    let exchange = Exchange::new(
        endpoint,
        ExchangeConfig::new(Duration::from_millis(700), Duration::from_millis(30))
            .with_attempts(3),
    )
    .with_port_lock(&port);
    let client = ModbusClient::new(exchange);

    println!("\n📥 read3_value (BCD) at register 0");
    match client.read3_value(addr, 0x0000, FloatBitsFormat::Bcd).await {
        Ok(value) => println!("  value = {value}"),
        Err(err) => {
            if let Some(ProtocolFault::DeviceException { code }) = err.protocol_fault() {
                println!("  device exception: {}", exception_description(*code));
            }
            println!("  failed: {}", err.chain());
        }
    }

    println!("\n📥 read3_u16 at register 0");
    match client.read3_u16(addr, 0x0000, ByteOrder::BigEndian).await {
        Ok(word) => println!("  word = {word:#06X}"),
        Err(err) => println!("  failed: {}", err.chain()),
    }

    println!("\n📤 write32 device command 5, argument 12.33 (BCD)");
    match client
        .write32(
            addr,
            FC_WRITE_MULTIPLE_REGISTERS,
            0x0005,
            12.33,
            FloatBitsFormat::Bcd,
        )
        .await
    {
        Ok(()) => println!("  acknowledged"),
        Err(err) => println!("  failed: {}", err.chain()),
    }

    Ok(())
}
