use anyhow::Result;
use serde_json::Value;

pub struct CliLogger {
    json: bool,
    no_color: bool,
}

impl CliLogger {
    pub fn new(json: bool, no_color: bool) -> Self {
        Self { json, no_color }
    }

    /// Prints a command result: one JSON line, or a styled header followed
    /// by an indented tree.
    pub fn print_result(&self, command: &str, value: &Value) -> Result<()> {
        if self.json {
            println!("{}", serde_json::to_string(value)?);
            return Ok(());
        }

        let mut out = String::new();
        out.push_str(&format!(
            "{} {} {}\n",
            self.style("pgoprof", "36;1"),
            self.style(command, "37;1"),
            self.style("OK", "32;1")
        ));
        if let Some(skipped) = value
            .pointer("/report/skipped")
            .and_then(Value::as_u64)
            .filter(|n| *n > 0)
        {
            out.push_str(&format!(
                "{} {skipped} input(s) skipped\n",
                self.style("warn", "33;1")
            ));
        }
        out.push_str(&render_value(value, 0));
        println!("{}", out.trim_end());
        Ok(())
    }

    pub fn print_error(&self, msg: &str) {
        if self.json {
            let out = serde_json::json!({
                "status": "error",
                "code": "error",
                "message": msg,
            });
            println!("{out}");
            return;
        }
        eprintln!("{} {msg}", self.style("error", "31;1"));
    }

    fn style(&self, text: &str, ansi: &str) -> String {
        if self.no_color {
            return text.to_string();
        }
        format!("\x1b[{ansi}m{text}\x1b[0m")
    }
}

fn render_value(value: &Value, indent: usize) -> String {
    match value {
        Value::Null => "-".to_string(),
        Value::Bool(v) => v.to_string(),
        Value::Number(v) => v.to_string(),
        Value::String(v) => v.clone(),
        Value::Array(items) => render_array(items, indent),
        Value::Object(map) => render_object(map, indent),
    }
}

fn render_array(items: &[Value], indent: usize) -> String {
    if items.is_empty() {
        return "[]".to_string();
    }

    let pad = " ".repeat(indent);
    let mut out = String::new();
    for item in items {
        match item {
            Value::Object(_) | Value::Array(_) => {
                out.push_str(&format!("{pad}-\n{}\n", render_value(item, indent + 2)));
            }
            _ => out.push_str(&format!("{pad}- {}\n", render_value(item, indent + 2))),
        }
    }
    out.trim_end().to_string()
}

fn render_object(map: &serde_json::Map<String, Value>, indent: usize) -> String {
    if map.is_empty() {
        return "{}".to_string();
    }

    let pad = " ".repeat(indent);
    let mut out = String::new();
    for (key, value) in map {
        match value {
            Value::Object(_) | Value::Array(_) => {
                out.push_str(&format!(
                    "{pad}{key}:\n{}\n",
                    render_value(value, indent + 2)
                ));
            }
            _ => out.push_str(&format!(
                "{pad}{key}: {}\n",
                render_value(value, indent + 2)
            )),
        }
    }
    out.trim_end().to_string()
}
