//! Diagnostic call stack. Frames carry no evaluation state; they exist
//! only so errors can report where they happened.

use std::fmt;
use std::rc::Rc;

#[derive(Debug, Clone, PartialEq)]
pub struct CallFrame {
    /// File of the call site.
    pub file: Rc<str>,
    /// Line of the call site.
    pub line: usize,
    /// Name of the closure the call was made from.
    pub closure: String,
    /// Name of the function being called.
    pub function: String,
}

impl fmt::Display for CallFrame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}:{}\t{}:{}()",
            self.file, self.line, self.closure, self.function
        )
    }
}

#[derive(Debug, Default, Clone)]
pub struct CallStack {
    frames: Vec<CallFrame>,
}

impl CallStack {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, frame: CallFrame) {
        tracing::trace!(depth = self.frames.len() + 1, %frame, "enter");
        self.frames.push(frame);
    }

    pub fn pop(&mut self) -> Option<CallFrame> {
        let frame = self.frames.pop();
        if let Some(frame) = &frame {
            tracing::trace!(depth = self.frames.len(), %frame, "leave");
        }
        frame
    }

    pub fn depth(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    pub fn clear(&mut self) {
        self.frames.clear();
    }

    /// Copy of the open frames, innermost first.
    pub fn snapshot(&self) -> Vec<CallFrame> {
        self.frames.iter().rev().cloned().collect()
    }
}
