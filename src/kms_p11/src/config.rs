use serde::Deserialize;

/// Provider configuration: one entry per slot. The host shim owns locating
/// and reading the document; the core only consumes the parsed form.
#[derive(Clone, Debug, Deserialize)]
pub struct Config {
    pub slots: Vec<SlotConfig>,
}

#[derive(Clone, Debug, Deserialize)]
pub struct SlotConfig {
    /// Full KMS key-ring resource name backing this slot.
    pub key_ring: String,
    /// Token label; the trailing key-ring path segment is used if unset.
    #[serde(default)]
    pub label: Option<String>,
}

impl Config {
    pub fn from_yaml(text: &str) -> std::result::Result<Self, serde_yaml::Error> {
        serde_yaml::from_str(text)
    }
}

impl SlotConfig {
    pub fn token_label(&self) -> &str {
        match &self.label {
            Some(label) => label.as_str(),
            None => self
                .key_ring
                .rsplit('/')
                .next()
                .unwrap_or(self.key_ring.as_str()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_slots() {
        let cfg = Config::from_yaml(
            r#"
slots:
  - key_ring: "projects/p/locations/us/keyRings/ring-a"
    label: "ring a"
  - key_ring: "projects/p/locations/us/keyRings/ring-b"
"#,
        )
        .unwrap();
        assert_eq!(cfg.slots.len(), 2);
        assert_eq!(cfg.slots[0].token_label(), "ring a");
        assert_eq!(cfg.slots[1].token_label(), "ring-b");
    }

    #[test]
    fn rejects_garbage() {
        assert!(Config::from_yaml("slots: 3").is_err());
    }
}
