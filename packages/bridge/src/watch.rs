//! Debug watch items
//!
//! Each item is an independent toggle inside the engine. Turning one on makes
//! the engine emit trace lines for that category through the router.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// The items that can be watched for debugging
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Watch {
    Facts,
    Instances,
    Slots,
    Rules,
    Activations,
    Messages,
    MessageHandlers,
    GenericFunctions,
    Methods,
    Deffunctions,
    Compilations,
    Statistics,
    Globals,
    Focus,
}

impl Watch {
    /// Every watch item, in engine order.
    pub const ALL: [Watch; 14] = [
        Watch::Facts,
        Watch::Instances,
        Watch::Slots,
        Watch::Rules,
        Watch::Activations,
        Watch::Messages,
        Watch::MessageHandlers,
        Watch::GenericFunctions,
        Watch::Methods,
        Watch::Deffunctions,
        Watch::Compilations,
        Watch::Statistics,
        Watch::Globals,
        Watch::Focus,
    ];

    /// Name used by the engine's `(watch ...)` command.
    pub fn as_str(&self) -> &'static str {
        match self {
            Watch::Facts => "facts",
            Watch::Instances => "instances",
            Watch::Slots => "slots",
            Watch::Rules => "rules",
            Watch::Activations => "activations",
            Watch::Messages => "messages",
            Watch::MessageHandlers => "message-handlers",
            Watch::GenericFunctions => "generic-functions",
            Watch::Methods => "methods",
            Watch::Deffunctions => "deffunctions",
            Watch::Compilations => "compilations",
            Watch::Statistics => "statistics",
            Watch::Globals => "globals",
            Watch::Focus => "focus",
        }
    }
}

impl fmt::Display for Watch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Watch {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Watch::ALL
            .iter()
            .copied()
            .find(|item| item.as_str() == s)
            .ok_or_else(|| format!("unknown watch item: {s}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_names_round_trip() {
        for item in Watch::ALL {
            assert_eq!(item.as_str().parse::<Watch>(), Ok(item));
        }
    }

    #[test]
    fn test_unknown_name() {
        assert!("everything".parse::<Watch>().is_err());
    }

    #[test]
    fn test_serde_uses_engine_names() {
        let json = serde_json::to_string(&Watch::MessageHandlers).unwrap();
        assert_eq!(json, "\"message-handlers\"");
    }
}
