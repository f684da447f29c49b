/// Destination for user-facing messages.
pub trait Ui: Send + Sync {
    fn info(&self, message: &str);
    fn error(&self, message: &str);
}

/// Writes info to stdout and errors to stderr.
pub struct TerminalUi;

impl Ui for TerminalUi {
    fn info(&self, message: &str) {
        println!("{message}");
    }

    fn error(&self, message: &str) {
        eprintln!("{message}");
    }
}

#[cfg(test)]
#[derive(Default)]
pub struct RecordingUi {
    pub infos: std::sync::Mutex<Vec<String>>,
    pub errors: std::sync::Mutex<Vec<String>>,
}

#[cfg(test)]
impl RecordingUi {
    pub fn error_lines(&self) -> Vec<String> {
        self.errors.lock().expect("ui lock").clone()
    }
}

#[cfg(test)]
impl Ui for RecordingUi {
    fn info(&self, message: &str) {
        self.infos.lock().expect("ui lock").push(message.to_string());
    }

    fn error(&self, message: &str) {
        self.errors.lock().expect("ui lock").push(message.to_string());
    }
}
