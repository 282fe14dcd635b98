//! The fixed persona roster and per-persona prompt text

use chrono::{DateTime, Local};
use rand::seq::SliceRandom;
use std::fmt;
use std::str::FromStr;

/// One of the fixed, well-known personas
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum PersonaId {
    Coach,
    Ellis,
    Nick,
    Rochelle,
    Bill,
    Francis,
    Louis,
    Zoey,
}

/// Every persona, in a stable order
pub const ROSTER: [PersonaId; 8] = [
    PersonaId::Coach,
    PersonaId::Ellis,
    PersonaId::Nick,
    PersonaId::Rochelle,
    PersonaId::Bill,
    PersonaId::Francis,
    PersonaId::Louis,
    PersonaId::Zoey,
];

impl PersonaId {
    /// Lowercase identifier, also the name of the persona's channel directory
    pub fn as_str(self) -> &'static str {
        match self {
            PersonaId::Coach => "coach",
            PersonaId::Ellis => "ellis",
            PersonaId::Nick => "nick",
            PersonaId::Rochelle => "rochelle",
            PersonaId::Bill => "bill",
            PersonaId::Francis => "francis",
            PersonaId::Louis => "louis",
            PersonaId::Zoey => "zoey",
        }
    }

    pub fn display_name(self) -> &'static str {
        match self {
            PersonaId::Coach => "Coach",
            PersonaId::Ellis => "Ellis",
            PersonaId::Nick => "Nick",
            PersonaId::Rochelle => "Rochelle",
            PersonaId::Bill => "Bill",
            PersonaId::Francis => "Francis",
            PersonaId::Louis => "Louis",
            PersonaId::Zoey => "Zoey",
        }
    }

    fn character(self) -> &'static str {
        match self {
            PersonaId::Coach => {
                "a former high-school football coach from Georgia: big-hearted, upbeat and fond of \
                 food and pep talks"
            }
            PersonaId::Ellis => {
                "a young mechanic from Savannah: friendly, talkative and always starting a story \
                 about his buddy Keith"
            }
            PersonaId::Nick => "a sharp-dressed gambler and con man: sarcastic, cynical and hard to impress",
            PersonaId::Rochelle => {
                "a TV news associate producer: level-headed, witty and the practical one of the group"
            }
            PersonaId::Bill => "a grizzled Vietnam veteran: gruff, blunt and never without a cigarette",
            PersonaId::Francis => "a tattooed biker: loud, contrarian and quick to say what he hates",
            PersonaId::Louis => "an IT systems analyst: relentlessly optimistic and cheerful under pressure",
            PersonaId::Zoey => {
                "a film student and horror-movie buff: quick, observant and dryly funny"
            }
        }
    }
}

impl fmt::Display for PersonaId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Unknown persona: {0}")]
pub struct UnknownPersona(pub String);

impl FromStr for PersonaId {
    type Err = UnknownPersona;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim();
        ROSTER
            .iter()
            .copied()
            .find(|p| p.as_str().eq_ignore_ascii_case(wanted))
            .ok_or_else(|| UnknownPersona(s.to_string()))
    }
}

const STYLE_RULES: &str = "Stay in character at all times. Reply with a few sentences of plain text at most; \
your reply is displayed verbatim, so do not use markdown, stage directions in brackets or emoji spam.";

/// Source of a persona's system prompt. A custom prompt replaces the built-in
/// character description; the date line is always regenerated.
#[derive(Debug, Clone)]
pub struct PersonaProfile {
    pub id: PersonaId,
    pub custom_prompt: Option<String>,
}

impl PersonaProfile {
    pub fn builtin(id: PersonaId) -> Self {
        Self {
            id,
            custom_prompt: None,
        }
    }

    /// Render a fresh system prompt for the given moment
    pub fn system_prompt(&self, now: DateTime<Local>) -> String {
        let today = now.format("%A, %B %-d, %Y");
        match &self.custom_prompt {
            Some(custom) => format!("{}\n\nToday is {today}.", custom.trim()),
            None => format!(
                "You are {}, {}. {STYLE_RULES}\n\nToday is {today}.",
                self.id.display_name(),
                self.id.character()
            ),
        }
    }
}

const FALLBACK_TEMPLATES: &[&str] = &[
    "{name} didn't catch that. Try again in a moment!",
    "{name} is busy holding off the horde right now. Give it another shot in a bit.",
    "{name} lost the signal for a second. Say that again shortly.",
];

/// Persona-flavored reply used when the provider fails. `detail` is appended
/// only when verbose errors are enabled.
pub fn fallback_message(id: PersonaId, detail: Option<&str>) -> String {
    let template = FALLBACK_TEMPLATES
        .choose(&mut rand::thread_rng())
        .copied()
        .unwrap_or(FALLBACK_TEMPLATES[0]);
    let message = template.replace("{name}", id.display_name());
    match detail {
        Some(detail) => format!("{message} ({detail})"),
        None => message,
    }
}
