use async_trait::async_trait;

use crate::event::{Event, EventKind};

/// Hook into process lifecycle events (logging, metrics, custom sinks).
#[async_trait]
pub trait Observer: Send + Sync + 'static {
    async fn on_event(&self, event: &Event);
}

/// Reference observer that prints labelled lines to stdout.
pub struct LoggerObserver;

#[async_trait]
impl Observer for LoggerObserver {
    async fn on_event(&self, e: &Event) {
        match e.kind {
            EventKind::ProcessAdded => {
                println!("[added] process={:?}", e.process);
            }
            EventKind::ProcessRemoved => {
                println!("[removed] process={:?}", e.process);
            }
            EventKind::ProcessStarting => {
                println!("[starting] process={:?}", e.process);
            }
            EventKind::ProcessRunning => {
                println!("[running] process={:?}", e.process);
            }
            EventKind::ProcessFinished => {
                println!("[finished] process={:?} code={:?}", e.process, e.exit_code);
            }
            EventKind::ProcessFailed => {
                println!(
                    "[failed] process={:?} code={:?} err={:?}",
                    e.process, e.exit_code, e.error
                );
            }
            EventKind::ProcessKilled => {
                println!("[killed] process={:?}", e.process);
            }
            EventKind::ReconnectScheduled => {
                println!(
                    "[reconnect] process={:?} delay={:?} err={:?}",
                    e.process, e.delay, e.error
                );
            }
            EventKind::StaleDetected => {
                println!("[stale] process={:?} timeout={:?}", e.process, e.delay);
            }
        }
    }
}
