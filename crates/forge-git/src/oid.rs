use std::fmt;

/// An opaque content-addressed identity for a git object (blob, tree,
/// or commit) — the "commit reference" and "tree reference" of
/// `spec.md` §3.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Oid(pub(crate) gix::ObjectId);

impl Oid {
    pub fn from_hex(hex: &str) -> Result<Self, forge_core::Error> {
        gix::ObjectId::from_hex(hex.as_bytes())
            .map(Oid)
            .map_err(|e| forge_core::Error::CorruptObject(format!("invalid object id '{hex}': {e}")))
    }

    pub(crate) fn inner(&self) -> gix::ObjectId {
        self.0
    }
}

impl From<gix::ObjectId> for Oid {
    fn from(id: gix::ObjectId) -> Self {
        Self(id)
    }
}

impl fmt::Display for Oid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.to_hex())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_garbage_hex() {
        assert!(Oid::from_hex("not-a-hash").is_err());
    }
}
