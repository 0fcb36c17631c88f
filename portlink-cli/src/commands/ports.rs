//! Port listing command implementation.

use {
    anyhow::Result,
    console::style,
    log::debug,
    portlink::{NativePortEnumerator, PortEnumerator, PortInfo},
};

/// Parse a USB vendor or product ID given in hex, with or without `0x`.
pub(crate) fn parse_usb_id(s: &str) -> Result<u16, String> {
    let digits = s
        .strip_prefix("0x")
        .or_else(|| s.strip_prefix("0X"))
        .unwrap_or(s);
    u16::from_str_radix(digits, 16).map_err(|_| format!("'{s}' is not a 16-bit hex USB ID"))
}

/// JSON form of one port.
fn port_json(p: &PortInfo) -> serde_json::Value {
    serde_json::json!({
        "name": p.name,
        "vid": p.vid,
        "pid": p.pid,
        "manufacturer": p.manufacturer,
        "product": p.product,
        "serial": p.serial_number,
    })
}

/// List ports command implementation.
///
/// `vid` and `pid` narrow the list to matching USB devices.
pub(crate) fn cmd_list_ports(json: bool, vid: Option<u16>, pid: Option<u16>) -> Result<()> {
    let filtered = vid.is_some() || pid.is_some();
    let detected = NativePortEnumerator::find_by_vid_pid(vid, pid).unwrap_or_else(|e| {
        debug!("Port enumeration failed: {e}");
        Vec::new()
    });

    if json {
        let ports: Vec<serde_json::Value> = detected
            .iter()
            .map(port_json)
            .collect();
        let output = serde_json::json!({
            "ok": true,
            "data": {
                "ports": ports,
            }
        });
        println!("{}", serde_json::to_string_pretty(&output)?);
        return Ok(());
    }

    eprintln!(
        "{}",
        style("Available serial ports")
            .bold()
            .underlined()
    );

    if detected.is_empty() {
        let note = if filtered { "No matching serial ports found" } else { "No serial ports found" };
        eprintln!("  {}", style(note).dim());
        return Ok(());
    }

    for port in &detected {
        eprintln!(
            "  {} {}",
            style("•").green(),
            crate::serial::port_label(port)
        );
    }
    if let ([only], false) = (detected.as_slice(), filtered) {
        eprintln!(
            "\n{} {} will be selected automatically",
            style("→")
                .green()
                .bold(),
            style(&only.name)
                .cyan()
                .bold()
        );
    }

    Ok(())
}
