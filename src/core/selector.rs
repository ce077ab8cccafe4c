/*
 * Resolution of operator selectors (`newest`, `oldest`, a slot number, or a literal
 * generation name) to a generation name for one client.
 */
use super::generations::GenerationTable;
use std::convert::Infallible;
use std::str::FromStr;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Selector {
    Slot(u32),
    Newest,
    Oldest,
    Name(String),
}

impl FromStr for Selector {
    type Err = Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if !s.is_empty()
            && s.bytes().all(|b| b.is_ascii_digit())
            && let Ok(slot) = s.parse::<u32>()
        {
            return Ok(Selector::Slot(slot));
        }
        Ok(match s {
            "newest" => Selector::Newest,
            "oldest" => Selector::Oldest,
            other => Selector::Name(other.to_string()),
        })
    }
}

impl std::fmt::Display for Selector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Selector::Slot(slot) => write!(f, "{slot}"),
            Selector::Newest => write!(f, "newest"),
            Selector::Oldest => write!(f, "oldest"),
            Selector::Name(name) => write!(f, "{name}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SelectorNotFound {
    pub client: String,
    pub selector: Selector,
}

impl std::fmt::Display for SelectorNotFound {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Selected backup '{}' not found for client '{}'",
            self.selector, self.client
        )
    }
}

impl std::error::Error for SelectorNotFound {}

impl Selector {
    /// Resolves against the client's generation table. A literal name is returned
    /// as-is; whether that generation exists on disk is the caller's concern.
    /// `oldest` is the deepest occupied slot, which is only an approximation of
    /// chronological age when the retention depth changed between runs.
    pub fn resolve(
        &self,
        client: &str,
        table: &GenerationTable,
    ) -> Result<String, SelectorNotFound> {
        let not_found = || SelectorNotFound {
            client: client.to_string(),
            selector: self.clone(),
        };
        let resolved = match self {
            Selector::Slot(slot) => table.get(*slot),
            Selector::Newest => table.get(0),
            Selector::Oldest => table.oldest().unwrap_or(""),
            Selector::Name(name) => name.as_str(),
        };
        if resolved.is_empty() {
            return Err(not_found());
        }
        log::debug!("SelectResolver: {client}: '{self}' -> '{resolved}'");
        Ok(resolved.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    fn table() -> GenerationTable {
        let mut slots = BTreeMap::new();
        slots.insert(0, "rubac.2024-01-03".to_string());
        slots.insert(1, "rubac.2024-01-02".to_string());
        slots.insert(2, "rubac.2024-01-01".to_string());
        GenerationTable::new(slots, 5)
    }

    #[test]
    fn test_parse_selectors() {
        assert_eq!("3".parse::<Selector>().unwrap(), Selector::Slot(3));
        assert_eq!("newest".parse::<Selector>().unwrap(), Selector::Newest);
        assert_eq!("oldest".parse::<Selector>().unwrap(), Selector::Oldest);
        assert_eq!(
            "rubac.snapshot.x".parse::<Selector>().unwrap(),
            Selector::Name("rubac.snapshot.x".to_string())
        );
    }

    #[test]
    fn test_resolve_against_table() {
        let t = table();
        assert_eq!(Selector::Newest.resolve("esme", &t).unwrap(), "rubac.2024-01-03");
        assert_eq!(Selector::Slot(1).resolve("esme", &t).unwrap(), "rubac.2024-01-02");
        assert_eq!(Selector::Oldest.resolve("esme", &t).unwrap(), "rubac.2024-01-01");
        assert_eq!(
            Selector::Name("anything".into()).resolve("esme", &t).unwrap(),
            "anything"
        );
    }

    #[test]
    fn test_empty_slot_is_not_found() {
        let err = Selector::Slot(4).resolve("esme", &table()).unwrap_err();
        assert_eq!(err.client, "esme");
        assert_eq!(err.selector, Selector::Slot(4));

        let empty = GenerationTable::new(BTreeMap::new(), 5);
        assert!(Selector::Oldest.resolve("esme", &empty).is_err());
        assert!(Selector::Newest.resolve("esme", &empty).is_err());
    }
}
