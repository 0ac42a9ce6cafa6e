#[cfg(feature = "rtu")]
#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    use modbus_station::prelude::*;

    let tty_path = "/dev/ttyUSB0";
    let slave = Slave(0x17);

    let builder = tokio_serial::new(tty_path, 19200);
    let port = tokio_serial::SerialStream::open(&builder)?;

    let mut ctx = rtu::attach_slave(port, slave);
    println!("Reading a sensor value");
    let rsp = ctx.read_holding_registers(0x082B, 2).await?;
    println!("Sensor value is: {:?}", rsp);

    Ok(())
}

#[cfg(not(feature = "rtu"))]
pub fn main() {
    println!("feature `rtu` is required to run this example");
    std::process::exit(1);
}
