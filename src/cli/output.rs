//! Rendering of readings and port listings for stdout

use crate::core::poller::CycleReport;
use crate::core::sensor::Reading;
use clap::ValueEnum;
use serde_json::json;

/// CLI output format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum OutputFormat {
    /// Human-readable text
    #[default]
    Text,
    /// One JSON object per line, for scripting
    Json,
}

/// One reading as a JSON value
pub fn reading_json(reading: &Reading) -> serde_json::Value {
    match &reading.outcome {
        Ok(m) => json!({
            "sensor": reading.sensor_name,
            "slave_id": reading.slave_id,
            "success": true,
            "temperature": m.temperature,
            "humidity": m.humidity,
            "timestamp": m.timestamp.to_rfc3339(),
        }),
        Err(e) => json!({
            "sensor": reading.sensor_name,
            "slave_id": reading.slave_id,
            "success": false,
            "error": e.to_string(),
        }),
    }
}

/// One reading as text lines
pub fn reading_text(reading: &Reading) -> String {
    match &reading.outcome {
        Ok(m) => format!(
            "{} (slave {}):\n  temperature: {:6.1} °C\n  humidity:    {:6.1} %RH",
            reading.sensor_name, reading.slave_id, m.temperature, m.humidity
        ),
        Err(e) => format!(
            "{} (slave {}): read failed: {}",
            reading.sensor_name, reading.slave_id, e
        ),
    }
}

/// Render a whole cycle
pub fn format_cycle(report: &CycleReport, format: OutputFormat) -> String {
    match format {
        OutputFormat::Json => report
            .readings
            .iter()
            .map(|r| reading_json(r).to_string())
            .collect::<Vec<_>>()
            .join("\n"),
        OutputFormat::Text => {
            let mut out = format!(
                "{:=<60}\ncycle {} at {}\n",
                "",
                report.cycle,
                chrono::Local::now().format("%Y-%m-%d %H:%M:%S")
            );
            for reading in &report.readings {
                out.push_str(&reading_text(reading));
                out.push('\n');
            }
            out.push_str(&format!(
                "{} ok, {} failed",
                report.successes(),
                report.failures()
            ));
            out
        }
    }
}

/// Render the system's serial ports
pub fn format_ports(ports: &[serialport::SerialPortInfo], format: OutputFormat) -> String {
    match format {
        OutputFormat::Json => {
            let list: Vec<serde_json::Value> = ports
                .iter()
                .map(|p| json!({ "name": p.port_name, "type": format!("{:?}", p.port_type) }))
                .collect();
            serde_json::Value::Array(list).to_string()
        }
        OutputFormat::Text => {
            if ports.is_empty() {
                return "No serial ports found.".to_string();
            }
            ports
                .iter()
                .map(|p| format!("{} [{:?}]", p.port_name, p.port_type))
                .collect::<Vec<_>>()
                .join("\n")
        }
    }
}
