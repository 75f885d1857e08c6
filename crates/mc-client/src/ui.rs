//! Declarative UI binding layer.
//!
//! The controller keeps a [`Screen`] (what the user should see) and turns it
//! into [`UiCommand`]s with [`render`]. Commands are idempotent: applying the
//! same batch twice leaves a host in the same state as applying it once.

use std::collections::HashMap;
use std::fmt;

use machines_api::MachineDetail;

use crate::timer::EXPIRED_MARKER;

/// Named anchors a host page provides.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Element {
    StartButton,
    TerminateButton,
    DetailPanel,
    ExpiryPanel,
}

impl fmt::Display for Element {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::StartButton => "start",
            Self::TerminateButton => "terminate",
            Self::DetailPanel => "detail",
            Self::ExpiryPanel => "expires",
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Label {
    Deploy,
    Terminate,
    Processing,
}

impl fmt::Display for Label {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Deploy => "Deploy",
            Self::Terminate => "Terminate",
            Self::Processing => "Processing...",
        })
    }
}

/// A blocking notice with a single close action.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Alert {
    pub title: String,
    pub body: String,
    pub button: String,
}

impl Alert {
    pub fn failed(body: impl Into<String>) -> Self {
        Self {
            title: "Failed".into(),
            body: body.into(),
            button: "Close".into(),
        }
    }
}

/// Lines of one block in a panel.
pub type Paragraph = Vec<String>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UiCommand {
    Show(Element),
    Hide(Element),
    Enable(Element),
    Disable(Element),
    SetLabel(Element, Label),
    SetContent(Element, Vec<Paragraph>),
    Alert(Alert),
}

/// Host-side renderer.
///
/// Called with the controller's view lock held; implementations must not
/// call back into the controller.
pub trait UiSink: Send + Sync + 'static {
    fn apply(&self, commands: &[UiCommand]);
}

// ── View state ──────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ButtonView {
    pub visible: bool,
    pub enabled: bool,
    pub label: Label,
}

impl ButtonView {
    pub fn actionable(label: Label) -> Self {
        Self {
            visible: true,
            enabled: true,
            label,
        }
    }

    pub fn loading() -> Self {
        Self {
            visible: true,
            enabled: false,
            label: Label::Processing,
        }
    }

    pub fn hidden(label: Label) -> Self {
        Self {
            visible: false,
            enabled: false,
            label,
        }
    }

    pub fn is_actionable(&self) -> bool {
        self.visible && self.enabled
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerBlock {
    pub name: String,
    pub endpoints: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DetailView {
    Placeholder,
    /// No containers reported: just the machine's address.
    Address(String),
    Containers(Vec<ContainerBlock>),
}

impl DetailView {
    pub fn from_detail(detail: &MachineDetail) -> Self {
        if detail.containers.is_empty() {
            return Self::Address(detail.public_ip.clone());
        }
        Self::Containers(
            detail
                .containers
                .iter()
                .map(|c| ContainerBlock {
                    name: c.name.clone(),
                    endpoints: c
                        .port_mappings
                        .iter()
                        .map(|p| format!("{}:{}", detail.public_ip, p.host_port))
                        .collect(),
                })
                .collect(),
        )
    }

    pub fn paragraphs(&self) -> Vec<Paragraph> {
        match self {
            Self::Placeholder => vec![vec![EXPIRED_MARKER.to_string()]],
            Self::Address(ip) => vec![vec![ip.clone()]],
            Self::Containers(blocks) => blocks
                .iter()
                .map(|b| {
                    std::iter::once(format!("[{}]", b.name))
                        .chain(b.endpoints.iter().cloned())
                        .collect()
                })
                .collect(),
        }
    }
}

/// Everything the user sees for one challenge machine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Screen {
    pub start: ButtonView,
    pub terminate: ButtonView,
    pub detail: DetailView,
    pub expiry: String,
}

impl Default for Screen {
    fn default() -> Self {
        Self {
            start: ButtonView::actionable(Label::Deploy),
            terminate: ButtonView::hidden(Label::Terminate),
            detail: DetailView::Placeholder,
            expiry: EXPIRED_MARKER.to_string(),
        }
    }
}

impl Screen {
    /// Fresh page waiting for the first status answer.
    pub fn resyncing() -> Self {
        Self {
            start: ButtonView::loading(),
            ..Self::default()
        }
    }

    pub fn start_requested(&mut self) {
        self.start = ButtonView::loading();
    }

    pub fn start_failed(&mut self) {
        self.start = ButtonView::actionable(Label::Deploy);
    }

    /// No machine: Start actionable, Terminate hidden.
    pub fn idle(&mut self) {
        self.start = ButtonView::actionable(Label::Deploy);
        self.terminate = ButtonView::hidden(Label::Terminate);
    }

    pub fn running(&mut self, detail: DetailView) {
        self.detail = detail;
        self.start = ButtonView {
            visible: false,
            enabled: false,
            label: self.start.label,
        };
        self.terminate = ButtonView::actionable(Label::Terminate);
    }

    pub fn terminate_requested(&mut self) {
        self.terminate = ButtonView::loading();
    }

    pub fn terminate_failed(&mut self) {
        self.terminate = ButtonView::actionable(Label::Terminate);
    }

    pub fn terminated(&mut self) {
        self.detail = DetailView::Placeholder;
        self.expiry = EXPIRED_MARKER.to_string();
        self.idle();
    }
}

// ── Rendering ───────────────────────────────────────────────────────

pub fn render_button(element: Element, button: &ButtonView) -> [UiCommand; 3] {
    [
        if button.visible {
            UiCommand::Show(element)
        } else {
            UiCommand::Hide(element)
        },
        if button.enabled {
            UiCommand::Enable(element)
        } else {
            UiCommand::Disable(element)
        },
        UiCommand::SetLabel(element, button.label),
    ]
}

pub fn render_expiry(label: &str) -> UiCommand {
    UiCommand::SetContent(Element::ExpiryPanel, vec![vec![label.to_string()]])
}

/// Full, idempotent paint of `screen`.
pub fn render(screen: &Screen) -> Vec<UiCommand> {
    let mut commands = Vec::with_capacity(8);
    commands.extend(render_button(Element::StartButton, &screen.start));
    commands.extend(render_button(Element::TerminateButton, &screen.terminate));
    commands.push(UiCommand::SetContent(
        Element::DetailPanel,
        screen.detail.paragraphs(),
    ));
    commands.push(render_expiry(&screen.expiry));
    commands
}

// ── Applied state ───────────────────────────────────────────────────

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ElementState {
    pub visible: bool,
    pub enabled: bool,
    pub label: Option<Label>,
    pub content: Vec<Paragraph>,
}

/// What a host currently displays, built by applying commands in order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Surface {
    elements: HashMap<Element, ElementState>,
    alerts: Vec<Alert>,
}

impl Surface {
    /// Apply one command. Returns whether anything visible changed.
    pub fn apply(&mut self, command: &UiCommand) -> bool {
        let element = match command {
            UiCommand::Alert(alert) => {
                self.alerts.push(alert.clone());
                return true;
            }
            UiCommand::Show(e)
            | UiCommand::Hide(e)
            | UiCommand::Enable(e)
            | UiCommand::Disable(e)
            | UiCommand::SetLabel(e, _)
            | UiCommand::SetContent(e, _) => *e,
        };

        let state = self.elements.entry(element).or_default();
        let before = state.clone();
        match command {
            UiCommand::Show(_) => state.visible = true,
            UiCommand::Hide(_) => state.visible = false,
            UiCommand::Enable(_) => state.enabled = true,
            UiCommand::Disable(_) => state.enabled = false,
            UiCommand::SetLabel(_, label) => state.label = Some(*label),
            UiCommand::SetContent(_, content) => state.content.clone_from(content),
            UiCommand::Alert(_) => {}
        }
        *state != before
    }

    pub fn element(&self, element: Element) -> ElementState {
        self.elements.get(&element).cloned().unwrap_or_default()
    }

    pub fn alerts(&self) -> &[Alert] {
        &self.alerts
    }

    /// Panel content flattened to lines.
    pub fn lines(&self, element: Element) -> Vec<String> {
        self.element(element).content.into_iter().flatten().collect()
    }
}
