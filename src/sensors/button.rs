//! Capture button
//!
//! A momentary switch between a BCM pin and ground, read with the internal
//! pull-up, so a press is a falling edge. Presses are forwarded into a Tokio
//! channel; the pipeline owns the receiving end.

use std::time::{Duration, Instant};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;

/// Where a capture request came from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Press {
    Button,
    Keyboard,
    Api,
}

/// Software debounce on top of the interrupt's own filtering
#[derive(Debug)]
pub struct Debouncer {
    window: Duration,
    last: Option<Instant>,
}

impl Debouncer {
    pub fn new(window: Duration) -> Self {
        Self { window, last: None }
    }

    /// True if `now` is far enough from the last accepted press
    pub fn accept(&mut self, now: Instant) -> bool {
        match self.last {
            Some(last) if now.saturating_duration_since(last) <= self.window => false,
            _ => {
                self.last = Some(now);
                true
            }
        }
    }
}

#[cfg(feature = "hardware")]
pub use gpio::GpioButton;

#[cfg(feature = "hardware")]
mod gpio {
    use super::{Debouncer, Press};
    use crate::error::Result;
    use rppal::gpio::{Event, Gpio, InputPin, Trigger};
    use std::time::{Duration, Instant};
    use tokio::sync::mpsc;

    pub struct GpioButton {
        pin: InputPin,
        running: bool,
    }

    impl GpioButton {
        /// Claim `pin` and start forwarding debounced presses to `tx`.
        /// Fails if the pin is already claimed by this or another process.
        pub fn start(pin: u8, debounce: Duration, tx: mpsc::Sender<Press>) -> Result<Self> {
            let mut input = Gpio::new()?.get(pin)?.into_input_pullup();
            let mut debouncer = Debouncer::new(debounce);

            input.set_async_interrupt(
                Trigger::FallingEdge,
                Some(debounce),
                move |_event: Event| {
                    if !debouncer.accept(Instant::now()) {
                        return;
                    }
                    // Full channel means a capture is already queued or running
                    if tx.try_send(Press::Button).is_err() {
                        tracing::debug!("Button press dropped, capture already pending");
                    }
                },
            )?;

            tracing::info!("Button listener started on GPIO {}", pin);
            Ok(Self {
                pin: input,
                running: true,
            })
        }

        pub fn pin(&self) -> u8 {
            self.pin.pin()
        }

        pub fn stop(&mut self) -> Result<()> {
            if self.running {
                self.pin.clear_async_interrupt()?;
                self.running = false;
                tracing::info!("Button listener on GPIO {} stopped", self.pin.pin());
            }
            Ok(())
        }
    }
}

/// Stand-in for the button when simulating: `y` + Enter captures,
/// `q` or end of input stops.
pub fn keyboard_presses(tx: mpsc::Sender<Press>) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        println!("Press 'y' then Enter to capture an item (or 'q' to quit)");

        loop {
            let line = match lines.next_line().await {
                Ok(Some(line)) => line,
                Ok(None) => {
                    tracing::info!("Input stream closed");
                    break;
                }
                Err(e) => {
                    tracing::warn!("Failed to read stdin: {}", e);
                    break;
                }
            };

            match parse_key(&line) {
                Some(KeyCommand::Capture) => {
                    if tx.try_send(Press::Keyboard).is_err() {
                        println!("Already processing an item, please wait.");
                    }
                }
                Some(KeyCommand::Quit) => break,
                None => println!("Invalid input. Press 'y' to capture or 'q' to quit."),
            }
        }
    })
}

#[derive(Debug, PartialEq, Eq)]
enum KeyCommand {
    Capture,
    Quit,
}

fn parse_key(line: &str) -> Option<KeyCommand> {
    match line.trim().to_ascii_lowercase().as_str() {
        "y" => Some(KeyCommand::Capture),
        "q" => Some(KeyCommand::Quit),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_first_press_accepted() {
        let mut debouncer = Debouncer::new(Duration::from_millis(300));
        assert!(debouncer.accept(Instant::now()));
    }

    #[test]
    fn test_bounce_rejected_then_accepted() {
        let mut debouncer = Debouncer::new(Duration::from_millis(300));
        let t0 = Instant::now();

        assert!(debouncer.accept(t0));
        assert!(!debouncer.accept(t0 + Duration::from_millis(20)));
        assert!(!debouncer.accept(t0 + Duration::from_millis(300)));
        assert!(debouncer.accept(t0 + Duration::from_millis(301)));
        // Window restarts from the last accepted press
        assert!(!debouncer.accept(t0 + Duration::from_millis(500)));
    }

    #[test]
    fn test_parse_key() {
        assert_eq!(parse_key("y"), Some(KeyCommand::Capture));
        assert_eq!(parse_key(" Y \n"), Some(KeyCommand::Capture));
        assert_eq!(parse_key("q"), Some(KeyCommand::Quit));
        assert_eq!(parse_key("yes"), None);
        assert_eq!(parse_key(""), None);
    }
}
