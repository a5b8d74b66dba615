//! Console print formatting is an external collaborator (spec.md section
//! 1): the core only needs an interface to call into it. `tacit-cli`
//! supplies the real implementation; this default is enough for tests
//! and embedders that don't care about console output.

use tacit_types::value::TaggedValue;

pub trait Printer {
    fn print(&mut self, value: TaggedValue, text: Option<&str>);
}

/// Collects printed values in memory instead of writing anywhere —
/// useful for tests and for embedding the VM without a console.
#[derive(Debug, Default)]
pub struct RecordingPrinter {
    pub lines: Vec<String>,
}

impl Printer for RecordingPrinter {
    fn print(&mut self, value: TaggedValue, text: Option<&str>) {
        match text {
            Some(s) => self.lines.push(s.to_string()),
            None => self.lines.push(format!("{:?}", value.untag())),
        }
    }
}
