#[cfg(test)]
use std::sync::Mutex;

/// One call recorded by [`MockOutput`]
#[cfg(test)]
#[derive(Debug, Clone, PartialEq)]
pub enum OutputMessage {
    Success(String),
    Error(String),
    Warning(String),
    Info(String),
    Section(String),
    KeyValue(String, String),
    Dimmed(String),
    TableHeader(Vec<String>),
    TableRow(Vec<String>),
    Blank,
}

/// User-facing terminal output, separate from diagnostic logging
pub trait Output: Send + Sync {
    fn success(&self, message: &str);

    fn error(&self, message: &str);

    fn warning(&self, message: &str);

    fn info(&self, message: &str);

    /// Section header
    fn section(&self, title: &str);

    fn key_value(&self, key: &str, value: &str);

    /// Secondary detail, such as the list of written files
    fn dimmed(&self, message: &str);

    fn table_header(&self, columns: &[&str]);

    fn table_row(&self, values: &[&str]);

    fn blank(&self);
}

/// Colored output through [`crate::output`]
pub struct TerminalOutput;

impl Output for TerminalOutput {
    fn success(&self, message: &str) {
        crate::output::success(message);
    }

    fn error(&self, message: &str) {
        crate::output::error(message);
    }

    fn warning(&self, message: &str) {
        crate::output::warning(message);
    }

    fn info(&self, message: &str) {
        crate::output::info(message);
    }

    fn section(&self, title: &str) {
        crate::output::section(title);
    }

    fn key_value(&self, key: &str, value: &str) {
        crate::output::key_value(key, value);
    }

    fn dimmed(&self, message: &str) {
        crate::output::dimmed(message);
    }

    fn table_header(&self, columns: &[&str]) {
        crate::output::table_header(columns);
    }

    fn table_row(&self, values: &[&str]) {
        crate::output::table_row(values);
    }

    fn blank(&self) {
        crate::output::blank();
    }
}

/// Records every call for assertions
#[cfg(test)]
#[derive(Default)]
pub struct MockOutput {
    messages: Mutex<Vec<OutputMessage>>,
}

#[cfg(test)]
impl MockOutput {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get_messages(&self) -> Vec<OutputMessage> {
        self.messages.lock().unwrap().clone()
    }

    pub fn has_error(&self) -> bool {
        self.get_messages()
            .iter()
            .any(|m| matches!(m, OutputMessage::Error(_)))
    }

    /// Cells of every table row, in order
    pub fn table_rows(&self) -> Vec<Vec<String>> {
        self.get_messages()
            .into_iter()
            .filter_map(|m| match m {
                OutputMessage::TableRow(cells) => Some(cells),
                _ => None,
            })
            .collect()
    }

    /// Plain-text rendering, one line per call
    pub fn to_text(&self) -> String {
        self.get_messages()
            .iter()
            .map(|msg| match msg {
                OutputMessage::Success(s) => format!("✓ {}", s),
                OutputMessage::Error(s) => format!("✗ {}", s),
                OutputMessage::Warning(s) => format!("⚠ {}", s),
                OutputMessage::Section(s) => format!("\n=== {} ===", s),
                OutputMessage::KeyValue(k, v) => format!("{}: {}", k, v),
                OutputMessage::Info(s) | OutputMessage::Dimmed(s) => s.clone(),
                OutputMessage::TableHeader(cells) | OutputMessage::TableRow(cells) => {
                    cells.join(" | ")
                }
                OutputMessage::Blank => String::new(),
            })
            .collect::<Vec<_>>()
            .join("\n")
    }

    fn push(&self, message: OutputMessage) {
        self.messages.lock().unwrap().push(message);
    }
}

#[cfg(test)]
impl Output for MockOutput {
    fn success(&self, message: &str) {
        self.push(OutputMessage::Success(message.to_string()));
    }

    fn error(&self, message: &str) {
        self.push(OutputMessage::Error(message.to_string()));
    }

    fn warning(&self, message: &str) {
        self.push(OutputMessage::Warning(message.to_string()));
    }

    fn info(&self, message: &str) {
        self.push(OutputMessage::Info(message.to_string()));
    }

    fn section(&self, title: &str) {
        self.push(OutputMessage::Section(title.to_string()));
    }

    fn key_value(&self, key: &str, value: &str) {
        self.push(OutputMessage::KeyValue(key.to_string(), value.to_string()));
    }

    fn dimmed(&self, message: &str) {
        self.push(OutputMessage::Dimmed(message.to_string()));
    }

    fn table_header(&self, columns: &[&str]) {
        self.push(OutputMessage::TableHeader(
            columns.iter().map(|c| c.to_string()).collect(),
        ));
    }

    fn table_row(&self, values: &[&str]) {
        self.push(OutputMessage::TableRow(
            values.iter().map(|v| v.to_string()).collect(),
        ));
    }

    fn blank(&self) {
        self.push(OutputMessage::Blank);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mock_output_records_rows_and_errors() {
        let output = MockOutput::new();
        output.table_header(&["Kind", "Emitted"]);
        output.table_row(&["databricks_job", "2"]);
        output.error("databricks_job[7] read: HTTP 500");

        assert_eq!(
            output.table_rows(),
            vec![vec!["databricks_job".to_string(), "2".to_string()]]
        );
        assert!(output.has_error());
        assert!(output.to_text().contains("Kind | Emitted"));
    }
}
