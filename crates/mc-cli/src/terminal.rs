//! Plain-text rendering of the machine widget.

use std::io::{self, Write};
use std::sync::{Mutex, PoisonError};

use mc_client::ui::{Element, ElementState, Surface, UiCommand, UiSink};

struct State<W> {
    surface: Surface,
    out: W,
    /// The last line written was the countdown, without a newline.
    inline: bool,
}

/// Prints whatever changed after each batch of commands.
///
/// The countdown is redrawn in place; everything else gets its own line.
pub struct TerminalSink<W: Write + Send + 'static = io::Stdout> {
    state: Mutex<State<W>>,
}

impl TerminalSink {
    pub fn stdout() -> Self {
        Self::new(io::stdout())
    }
}

impl<W: Write + Send + 'static> TerminalSink<W> {
    pub fn new(out: W) -> Self {
        Self {
            state: Mutex::new(State {
                surface: Surface::default(),
                out,
                inline: false,
            }),
        }
    }

    #[cfg(test)]
    fn surface(&self) -> Surface {
        self.state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .surface
            .clone()
    }

    #[cfg(test)]
    fn into_inner(self) -> W {
        self.state.into_inner().unwrap_or_else(PoisonError::into_inner).out
    }
}

fn describe(element: Element, state: &ElementState) -> String {
    match element {
        Element::StartButton | Element::TerminateButton => {
            let label = state.label.map(|l| l.to_string()).unwrap_or_default();
            let mode = match (state.visible, state.enabled) {
                (false, _) => "hidden",
                (true, false) => "busy",
                (true, true) => "ready",
            };
            format!("{element}: {label} ({mode})")
        }
        Element::DetailPanel | Element::ExpiryPanel => {
            let lines: Vec<String> = state.content.iter().map(|p| p.join(" ")).collect();
            format!("{element}: {}", lines.join(", "))
        }
    }
}

impl<W: Write + Send + 'static> State<W> {
    fn line(&mut self, text: &str) -> io::Result<()> {
        if self.inline {
            writeln!(self.out)?;
            self.inline = false;
        }
        writeln!(self.out, "{text}")
    }

    fn countdown(&mut self, text: &str) -> io::Result<()> {
        write!(self.out, "\r\x1b[2K{text}")?;
        self.inline = true;
        Ok(())
    }

    fn apply(&mut self, commands: &[UiCommand]) -> io::Result<()> {
        let mut changed: Vec<Element> = Vec::new();
        for command in commands {
            let visible = self.surface.apply(command);
            match command {
                UiCommand::Alert(alert) => {
                    let text = format!("[{}] {}", alert.title, alert.body);
                    self.line(&text)?;
                }
                UiCommand::Show(e)
                | UiCommand::Hide(e)
                | UiCommand::Enable(e)
                | UiCommand::Disable(e)
                | UiCommand::SetLabel(e, _)
                | UiCommand::SetContent(e, _) => {
                    if visible && !changed.contains(e) {
                        changed.push(*e);
                    }
                }
            }
        }

        for element in changed {
            let text = describe(element, &self.surface.element(element));
            if element == Element::ExpiryPanel {
                self.countdown(&text)?;
            } else {
                self.line(&text)?;
            }
        }
        self.out.flush()
    }
}

impl<W: Write + Send + 'static> UiSink for TerminalSink<W> {
    fn apply(&self, commands: &[UiCommand]) {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        if let Err(e) = state.apply(commands) {
            tracing::warn!(error = %e, "failed to write to terminal");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mc_client::ui::{Alert, DetailView, Screen, render, render_expiry};

    fn output(sink: TerminalSink<Vec<u8>>) -> String {
        String::from_utf8(sink.into_inner()).unwrap()
    }

    #[test]
    fn prints_initial_screen() {
        let sink = TerminalSink::new(Vec::new());
        sink.apply(&render(&Screen::default()));

        let text = output(sink);
        assert!(text.contains("start: Deploy (ready)\n"), "{text}");
        assert!(text.contains("terminate: Terminate (hidden)\n"), "{text}");
        assert!(text.contains("detail: -\n"), "{text}");
        assert!(text.ends_with("\r\x1b[2Kexpires: -"), "{text}");
    }

    #[test]
    fn unchanged_elements_are_not_reprinted() {
        let sink = TerminalSink::new(Vec::new());
        sink.apply(&render(&Screen::default()));
        sink.apply(&render_expiry_batch("10m"));
        sink.apply(&render_expiry_batch("10m"));
        sink.apply(&render_expiry_batch("9m 59s"));

        let text = output(sink);
        assert_eq!(text.matches("expires: 10m").count(), 1);
        assert!(text.ends_with("\r\x1b[2Kexpires: 9m 59s"), "{text}");
    }

    fn render_expiry_batch(label: &str) -> Vec<UiCommand> {
        vec![render_expiry(label)]
    }

    #[test]
    fn lines_after_countdown_start_fresh() {
        let sink = TerminalSink::new(Vec::new());
        let mut screen = Screen::default();
        screen.running(DetailView::Address("192.0.2.10".into()));
        sink.apply(&render(&screen));
        sink.apply(&[UiCommand::Alert(Alert::failed("Failed to terminate machine."))]);

        let surface = sink.surface();
        assert_eq!(surface.alerts().len(), 1);
        let text = output(sink);
        assert!(text.contains("detail: 192.0.2.10\n"), "{text}");
        assert!(text.ends_with("-\n[Failed] Failed to terminate machine.\n"), "{text}");
    }
}
