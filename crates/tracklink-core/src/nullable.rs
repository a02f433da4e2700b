use serde::{Deserialize, Deserializer};

/// Accept an explicit `null` wherever a collection is expected; older dumps
/// write `null` for collections that were never filled.
pub(crate) fn or_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de> + Default,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}
