//! Output formatting: JSON, compact JSON, YAML.

use std::io::{self, Write};

use serde::Serialize;

use crate::cli::OutputFormat;
use crate::error::CliError;

/// Render a serde-serializable value in the chosen format.
pub fn render<T: Serialize + ?Sized>(format: OutputFormat, data: &T) -> Result<String, CliError> {
    let rendered = match format {
        OutputFormat::Json => serde_json::to_string_pretty(data)?,
        OutputFormat::JsonCompact => serde_json::to_string(data)?,
        OutputFormat::Yaml => serde_yaml::to_string(data)?.trim_end().to_owned(),
    };
    Ok(rendered)
}

/// Print rendered output to stdout.
pub fn print_output(output: &str) {
    if output.is_empty() {
        return;
    }
    let mut stdout = io::stdout().lock();
    let _ = writeln!(stdout, "{output}");
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn formats() {
        let data = json!({"exists": true, "up_to_date": false});
        assert_eq!(
            render(OutputFormat::JsonCompact, &data).unwrap(),
            r#"{"exists":true,"up_to_date":false}"#
        );
        assert_eq!(
            render(OutputFormat::Yaml, &data).unwrap(),
            "exists: true\nup_to_date: false"
        );
        assert!(render(OutputFormat::Json, &data).unwrap().contains("\n  \"exists\": true"));
    }
}
