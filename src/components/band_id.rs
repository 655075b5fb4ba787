use std::fmt::Display;

use crate::{
    components::vrt::Vrt,
    errors::{Result, RustervrtError},
};

/// Metadata key holding the unique name of a band within its tree.
pub const BAND_NAME: &str = "BandName";

/// User facing band identifier, either a 1-based band number
/// or the value of the band's `BandName` metadata.
#[derive(Clone, Debug, PartialEq, Eq, Hash, serde::Deserialize, serde::Serialize)]
#[serde(untagged)]
pub enum BandId {
    Number(usize),
    Name(String),
}

impl From<usize> for BandId {
    fn from(value: usize) -> Self {
        BandId::Number(value)
    }
}

impl From<&str> for BandId {
    fn from(value: &str) -> Self {
        BandId::Name(value.to_string())
    }
}

impl From<String> for BandId {
    fn from(value: String) -> Self {
        BandId::Name(value)
    }
}

impl From<&BandId> for BandId {
    fn from(value: &BandId) -> Self {
        value.clone()
    }
}

impl Display for BandId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BandId::Number(number) => write!(f, "{number}"),
            BandId::Name(name) => write!(f, "{name}"),
        }
    }
}

impl BandId {
    /// Absolute band number of this identifier in `vrt`.
    ///
    /// Every band lookup in the crate goes through here.
    pub fn resolve(&self, vrt: &Vrt) -> Result<usize> {
        let count = vrt.band_count();
        let found = match self {
            BandId::Number(number) => (1..=count).contains(number).then_some(*number),
            BandId::Name(name) => vrt
                .bands()
                .iter()
                .position(|band| band.name() == Some(name.as_str()))
                .map(|idx| idx + 1),
        };
        found.ok_or_else(|| RustervrtError::BandNotFound {
            band: self.clone(),
            count,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::components::{
        band::{BandSource, DataType},
        georef::Grid,
        metadata::Metadata,
    };
    use rstest::{fixture, rstest};

    #[fixture]
    fn vrt() -> Vrt {
        let mut vrt = Vrt::new(Grid::default_for_size((4, 4)));
        for name in ["A", "B", "C"] {
            vrt.create_band(
                BandSource::File {
                    path: "scene.tif".into(),
                    band: 1,
                },
                DataType::Float32,
                Metadata::from_iter([(BAND_NAME, name)]),
            );
        }
        vrt
    }

    #[rstest]
    #[case(1)]
    #[case(2)]
    #[case(3)]
    fn numbers_resolve_to_themselves(vrt: Vrt, #[case] number: usize) {
        assert_eq!(BandId::from(number).resolve(&vrt).unwrap(), number);
    }

    #[rstest]
    #[case("A", 1)]
    #[case("B", 2)]
    #[case("C", 3)]
    fn names_resolve_to_their_position(vrt: Vrt, #[case] name: &str, #[case] expected: usize) {
        assert_eq!(BandId::from(name).resolve(&vrt).unwrap(), expected);
    }

    #[rstest]
    #[case(BandId::Number(0))]
    #[case(BandId::Number(4))]
    #[case(BandId::from("D"))]
    fn unknown_identifiers_are_rejected(vrt: Vrt, #[case] band: BandId) {
        assert!(matches!(
            band.resolve(&vrt),
            Err(RustervrtError::BandNotFound { count: 3, .. })
        ));
    }

    #[test]
    fn deserializes_numbers_and_names() {
        let ids: Vec<BandId> = serde_json::from_str(r#"[2, "sigma0"]"#).unwrap();
        assert_eq!(ids, vec![BandId::Number(2), BandId::from("sigma0")]);
    }
}
