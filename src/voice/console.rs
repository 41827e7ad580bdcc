//! Line-driven recognition engine
//!
//! Reads transcript lines from a text stream (stdin by default) so the
//! conversation can be driven without a microphone:
//!
//! ```text
//! ~hey asis          interim result
//! hey asistan        final result
//! !end               the engine ends on its own
//! !error network     the engine reports an error, then ends
//! ```

use std::sync::{Arc, Mutex};

use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader};

use super::engine::{
    EngineErrorKind, EngineEvent, EngineFactory, EngineOptions, EngineSink, RecognitionEngine,
    RecognitionResult,
};
use crate::{Error, Result};

/// Events a single input line stands for
#[must_use]
pub fn parse_line(line: &str) -> Vec<EngineEvent> {
    let line = line.trim();
    if line.is_empty() {
        return Vec::new();
    }

    if let Some(text) = line.strip_prefix('~') {
        let text = text.trim();
        if text.is_empty() {
            return Vec::new();
        }
        return vec![EngineEvent::Results(vec![RecognitionResult::interim_text(text)])];
    }

    if line == "!end" {
        return vec![EngineEvent::Ended];
    }

    if let Some(kind) = line.strip_prefix("!error") {
        let kind = match kind.trim() {
            "" => EngineErrorKind::Other("unknown".to_string()),
            kind => EngineErrorKind::parse(kind),
        };
        return vec![EngineEvent::Error(kind), EngineEvent::Ended];
    }

    vec![EngineEvent::Results(vec![RecognitionResult::final_text(line)])]
}

/// Sink of the instance currently listening, if any
type Target = Arc<Mutex<Option<EngineSink>>>;

/// Creates engines that share one line reader
pub struct ConsoleEngineFactory {
    target: Target,
}

impl ConsoleEngineFactory {
    /// Read lines from stdin
    ///
    /// Must be called from within a tokio runtime.
    #[must_use]
    pub fn stdin() -> Self {
        Self::from_reader(BufReader::new(tokio::io::stdin()))
    }

    /// Read lines from any buffered reader
    ///
    /// Must be called from within a tokio runtime.
    pub fn from_reader<R>(reader: R) -> Self
    where
        R: AsyncBufRead + Unpin + Send + 'static,
    {
        let target: Target = Arc::new(Mutex::new(None));
        let shared = Arc::clone(&target);

        tokio::spawn(async move {
            let mut lines = reader.lines();
            loop {
                match lines.next_line().await {
                    Ok(Some(line)) => deliver(&shared, parse_line(&line)),
                    Ok(None) => {
                        tracing::debug!("console input closed");
                        break;
                    }
                    Err(e) => {
                        tracing::warn!(error = %e, "console input failed");
                        break;
                    }
                }
            }
        });

        Self { target }
    }
}

/// Forward events to the listening instance; lines typed while nothing
/// listens are dropped
fn deliver(target: &Target, events: Vec<EngineEvent>) {
    let Ok(mut slot) = target.lock() else {
        return;
    };

    for event in events {
        let Some(sink) = slot.as_ref() else {
            tracing::trace!(?event, "console line dropped, not listening");
            return;
        };
        let ends = matches!(event, EngineEvent::Ended);
        sink.emit(event);
        if ends {
            *slot = None;
        }
    }
}

impl EngineFactory for ConsoleEngineFactory {
    fn create(
        &self,
        sink: EngineSink,
        _options: &EngineOptions,
    ) -> Result<Box<dyn RecognitionEngine>> {
        Ok(Box::new(ConsoleEngine {
            sink,
            target: Arc::clone(&self.target),
        }))
    }
}

struct ConsoleEngine {
    sink: EngineSink,
    target: Target,
}

impl ConsoleEngine {
    /// Whether this instance is the one receiving lines
    fn owns(slot: &Option<EngineSink>, generation: u64) -> bool {
        slot.as_ref().is_some_and(|s| s.generation() == generation)
    }
}

impl RecognitionEngine for ConsoleEngine {
    fn start(&mut self) -> Result<()> {
        let mut slot = self
            .target
            .lock()
            .map_err(|_| Error::Engine("console engine poisoned".to_string()))?;
        if Self::owns(&slot, self.sink.generation()) {
            return Err(Error::Engine("recognition already started".to_string()));
        }

        *slot = Some(self.sink.clone());
        self.sink.emit(EngineEvent::Started);
        Ok(())
    }

    fn stop(&mut self) {
        if let Ok(mut slot) = self.target.lock()
            && Self::owns(&slot, self.sink.generation())
        {
            *slot = None;
            self.sink.emit(EngineEvent::Ended);
        }
    }

    fn abort(&mut self) {
        if let Ok(mut slot) = self.target.lock()
            && Self::owns(&slot, self.sink.generation())
        {
            *slot = None;
        }
    }
}
