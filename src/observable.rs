//! Observables: semantic queries for something to be observed.
//!
//! An [`Observable`] is a [`Concept`] plus qualifiers. Observables are
//! immutable once built; the resolver only reads them.

use std::fmt;
use std::str::FromStr;
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::{CatalogError, CatalogResult};
use crate::value::Value;

static RE_CONCEPT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[A-Za-z_][A-Za-z0-9_.\-]*:[A-Za-z_][A-Za-z0-9_.\-]*$").unwrap()
});

/// A reference to a semantic type, written `namespace:Name`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Concept {
    urn: String,
}

impl Concept {
    pub fn new(urn: impl Into<String>) -> CatalogResult<Self> {
        let urn = urn.into();
        if !RE_CONCEPT.is_match(&urn) {
            return Err(CatalogError::MalformedDefinition {
                message: "concepts are written namespace:Name".into(),
                definition: urn,
            });
        }
        Ok(Self { urn })
    }

    pub fn urn(&self) -> &str {
        &self.urn
    }

    pub fn namespace(&self) -> &str {
        self.urn.split_once(':').map_or("", |(ns, _)| ns)
    }

    pub fn local_name(&self) -> &str {
        self.urn.split_once(':').map_or(&self.urn, |(_, name)| name)
    }
}

impl fmt::Display for Concept {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.urn)
    }
}

impl TryFrom<String> for Concept {
    type Error = CatalogError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Concept::new(value)
    }
}

impl From<Concept> for String {
    fn from(c: Concept) -> Self {
        c.urn
    }
}

/// How strictly the concept of an observable must match a model's output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResolutionMode {
    /// Only models producing exactly this concept.
    #[default]
    Exact,
    /// Models producing this concept or any concept it subsumes.
    Any,
}

/// A semantic query: a concept plus qualifiers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "ObservableRepr")]
pub struct Observable {
    pub concept: Concept,
    /// Name given to the observable in the request or model, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stated_name: Option<String>,
    /// Distributed over a population ("each X") rather than a single quality.
    #[serde(default)]
    pub collective: bool,
    #[serde(default)]
    pub optional: bool,
    /// Used when nothing can produce the observable.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_value: Option<Value>,
    #[serde(default)]
    pub mode: ResolutionMode,
}

impl Observable {
    pub fn new(concept: Concept) -> Self {
        Self {
            concept,
            stated_name: None,
            collective: false,
            optional: false,
            default_value: None,
            mode: ResolutionMode::Exact,
        }
    }

    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.stated_name = Some(name.into());
        self
    }

    pub fn collective(mut self) -> Self {
        self.collective = true;
        self
    }

    pub fn optional(mut self) -> Self {
        self.optional = true;
        self
    }

    pub fn with_default(mut self, value: impl Into<Value>) -> Self {
        self.default_value = Some(value.into());
        self
    }

    pub fn with_mode(mut self, mode: ResolutionMode) -> Self {
        self.mode = mode;
        self
    }

    /// Canonical name, used as the target identifier in encoded dataflows.
    pub fn urn(&self) -> String {
        if self.collective {
            format!("each {}", self.concept)
        } else {
            self.concept.urn().to_string()
        }
    }

    /// Identity for search bookkeeping. Optionality and defaults do not
    /// change what is being observed, so they are not part of the key.
    pub fn key(&self) -> String {
        match self.mode {
            ResolutionMode::Exact => self.urn(),
            ResolutionMode::Any => format!("any {}", self.urn()),
        }
    }

    /// Whether `other` asks for the same thing as this observable.
    pub fn same_semantics(&self, other: &Observable) -> bool {
        self.concept == other.concept && self.collective == other.collective
    }
}

impl fmt::Display for Observable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.optional {
            f.write_str("optional ")?;
        }
        if self.mode == ResolutionMode::Any {
            f.write_str("any ")?;
        }
        f.write_str(&self.urn())?;
        if let Some(name) = &self.stated_name {
            write!(f, " named {name}")?;
        }
        Ok(())
    }
}

/// Parses `[optional] [any] [each] namespace:Concept [named name]`.
impl FromStr for Observable {
    type Err = CatalogError;

    fn from_str(definition: &str) -> Result<Self, Self::Err> {
        let malformed = |message: &str| CatalogError::MalformedDefinition {
            definition: definition.to_string(),
            message: message.to_string(),
        };

        let mut tokens = definition.split_whitespace().peekable();
        let mut optional = false;
        let mut collective = false;
        let mut mode = ResolutionMode::Exact;
        let mut concept = None;
        let mut stated_name = None;

        while let Some(token) = tokens.next() {
            match token {
                "optional" if concept.is_none() => optional = true,
                "any" if concept.is_none() => mode = ResolutionMode::Any,
                "each" if concept.is_none() => collective = true,
                "named" if concept.is_some() => {
                    let name = tokens.next().ok_or_else(|| malformed("`named` needs a name"))?;
                    stated_name = Some(name.to_string());
                }
                other if concept.is_none() => concept = Some(Concept::new(other)?),
                other => return Err(malformed(&format!("unexpected token {other:?}"))),
            }
        }

        let concept = concept.ok_or_else(|| malformed("no concept given"))?;
        Ok(Self {
            concept,
            stated_name,
            collective,
            optional,
            default_value: None,
            mode,
        })
    }
}

/// Serde adapter writing an observable as its textual definition, for
/// formats that cannot carry the structured form. Default values are not
/// part of the definition and are dropped.
pub mod as_definition {
    use serde::{Deserialize, Deserializer, Serializer};

    use super::Observable;

    pub fn serialize<S: Serializer>(observable: &Observable, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(observable)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Observable, D::Error> {
        let definition = String::deserialize(deserializer)?;
        definition.parse().map_err(serde::de::Error::custom)
    }
}

/// Accepts either a textual definition or the full structured form.
#[derive(Deserialize)]
#[serde(untagged)]
enum ObservableRepr {
    Definition(String),
    Full {
        concept: Concept,
        #[serde(default)]
        stated_name: Option<String>,
        #[serde(default)]
        collective: bool,
        #[serde(default)]
        optional: bool,
        #[serde(default)]
        default_value: Option<Value>,
        #[serde(default)]
        mode: ResolutionMode,
    },
}

impl TryFrom<ObservableRepr> for Observable {
    type Error = CatalogError;

    fn try_from(repr: ObservableRepr) -> Result<Self, Self::Error> {
        match repr {
            ObservableRepr::Definition(text) => text.parse(),
            ObservableRepr::Full {
                concept,
                stated_name,
                collective,
                optional,
                default_value,
                mode,
            } => Ok(Self {
                concept,
                stated_name,
                collective,
                optional,
                default_value,
                mode,
            }),
        }
    }
}
