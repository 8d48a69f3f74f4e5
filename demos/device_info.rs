use std::path::Path;

use anyhow::Context;
use emebridge::device::Device;
use emebridge::playready;

fn main() -> anyhow::Result<()> {
    let path = std::env::args()
        .nth(1)
        .context("Usage: device_info <device.wvd|device.prd>")?;

    if Path::new(&path).extension().and_then(|e| e.to_str()) == Some("prd") {
        let device = playready::Device::from_path(&path)?;
        println!("format: PRD v{}", device.version);
        println!("security_level: {:?}", device.security_level());
        println!("has_group_key: {}", device.group_key.is_some());
        return Ok(());
    }

    let device = Device::from_path(&path)?;
    println!("device_type: {:?}", device.device_type);
    println!("system_id: {}", device.system_id);
    println!("security_level: {}", device.security_level);
    println!("has_vmp: {}", device.has_vmp());

    Ok(())
}
