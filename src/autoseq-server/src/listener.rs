// SPDX-FileCopyrightText: 2025 Stanislaw Grams <stanislawgrams@gmail.com>
//
// SPDX-License-Identifier: BSD-2-Clause

//! JSON-lines event output for autoseq-server.
//!
//! Writes one `AutomationEvent` object per line, so the daemon's stdout can
//! be piped into other tools while diagnostics go through `tracing`.

use std::io::{self, Write};
use std::sync::Mutex;

use autoseq_core::controller::{AutomationEvent, AutomationListener};
use autoseq_core::{AutomationError, AutomationState};
use tracing::warn;

pub struct JsonEventWriter<W> {
    out: Mutex<W>,
}

impl JsonEventWriter<io::Stdout> {
    pub fn stdout() -> Self {
        Self::new(io::stdout())
    }
}

impl<W: Write + Send> JsonEventWriter<W> {
    pub fn new(out: W) -> Self {
        Self {
            out: Mutex::new(out),
        }
    }

    fn write(&self, event: &AutomationEvent) {
        let Ok(mut out) = self.out.lock() else {
            return;
        };
        let written = serde_json::to_writer(&mut *out, event)
            .map_err(io::Error::from)
            .and_then(|()| out.write_all(b"\n"))
            .and_then(|()| out.flush());
        if let Err(e) = written {
            warn!("Failed to write event: {}", e);
        }
    }

    #[cfg(test)]
    fn into_inner(self) -> W {
        self.out.into_inner().unwrap_or_else(|e| e.into_inner())
    }
}

impl<W: Write + Send> AutomationListener for JsonEventWriter<W> {
    fn on_state_change(&self, old: AutomationState, new: AutomationState) {
        self.write(&AutomationEvent::StateChanged { from: old, to: new });
    }

    fn on_log(&self, message: &str) {
        self.write(&AutomationEvent::Log {
            message: message.to_string(),
        });
    }

    fn on_error(&self, error: &AutomationError) {
        self.write(&AutomationEvent::Error {
            state: error.state(),
            message: error.to_string(),
        });
    }
}
