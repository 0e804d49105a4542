//! Namespace derivation and the closed scope/namespace vocabulary.

use std::fmt;

/// One of the four closed namespace levels a graph can belong to.
///
/// Namespace is the *sole* basis for write authorization: a writer bound
/// to one namespace may never mutate a graph whose derived namespace
/// differs.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Namespace {
    /// `L1:<citizen>` — personal graph.
    Personal(String),
    /// `L2:<org>` — organizational graph.
    Organizational(String),
    /// `L3:<ecosystem>` — ecosystem graph.
    Ecosystem(String),
    /// `L4:protocol` — the single protocol-wide graph.
    Protocol,
}

/// The scope a formation declares itself as belonging to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Scope {
    Personal,
    Organizational,
    Ecosystem,
}

impl fmt::Display for Namespace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Namespace::Personal(g) => write!(f, "L1:{g}"),
            Namespace::Organizational(g) => write!(f, "L2:{g}"),
            Namespace::Ecosystem(g) => write!(f, "L3:{g}"),
            Namespace::Protocol => write!(f, "L4:protocol"),
        }
    }
}

impl Namespace {
    /// Derive the namespace from a physical graph name.
    ///
    /// Physical names follow `<ecosystem>_<org>_<citizen>` (L1),
    /// `<ecosystem>_<org>` (L2), `<ecosystem>` (L3), or the literal
    /// `protocol` (L4). The rule is purely structural: count the
    /// underscore-separated segments.
    pub fn for_graph(graph_name: &str) -> Namespace {
        if graph_name == "protocol" {
            return Namespace::Protocol;
        }
        let segments: Vec<&str> = graph_name.split('_').collect();
        match segments.len() {
            3 => Namespace::Personal(graph_name.to_string()),
            2 => Namespace::Organizational(graph_name.to_string()),
            _ => Namespace::Ecosystem(graph_name.to_string()),
        }
    }

    pub fn scope(&self) -> Option<Scope> {
        match self {
            Namespace::Personal(_) => Some(Scope::Personal),
            Namespace::Organizational(_) => Some(Scope::Organizational),
            Namespace::Ecosystem(_) => Some(Scope::Ecosystem),
            Namespace::Protocol => None,
        }
    }
}

impl fmt::Display for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Scope::Personal => write!(f, "personal"),
            Scope::Organizational => write!(f, "organizational"),
            Scope::Ecosystem => write!(f, "ecosystem"),
        }
    }
}

impl std::str::FromStr for Scope {
    type Err = crate::Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "personal" => Ok(Scope::Personal),
            "organizational" | "org" => Ok(Scope::Organizational),
            "ecosystem" => Ok(Scope::Ecosystem),
            other => Err(crate::Error::SchemaViolation(format!(
                "unknown scope {other:?}"
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn personal_graph_has_three_segments() {
        let ns = Namespace::for_graph("ada_felixlabs_felix");
        assert_eq!(ns, Namespace::Personal("ada_felixlabs_felix".into()));
        assert_eq!(ns.to_string(), "L1:ada_felixlabs_felix");
    }

    #[test]
    fn organizational_graph_has_two_segments() {
        let ns = Namespace::for_graph("ada_felixlabs");
        assert_eq!(ns, Namespace::Organizational("ada_felixlabs".into()));
    }

    #[test]
    fn ecosystem_graph_has_one_segment() {
        let ns = Namespace::for_graph("ada");
        assert_eq!(ns, Namespace::Ecosystem("ada".into()));
    }

    #[test]
    fn protocol_is_the_literal_name() {
        assert_eq!(Namespace::for_graph("protocol"), Namespace::Protocol);
    }

    #[test]
    fn scope_round_trips_through_display() {
        assert_eq!("personal".parse::<Scope>().unwrap(), Scope::Personal);
        assert_eq!(Scope::Ecosystem.to_string(), "ecosystem");
    }
}
