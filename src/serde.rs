use serde::ser::{Serialize, SerializeMap, Serializer};
use sdd::Guard;

use super::{IdentityKey, IdentityMap, ResizePolicy};

impl<K, V, P> Serialize for IdentityMap<K, V, P>
where
    K: Serialize + IdentityKey + 'static,
    V: Serialize + 'static,
    P: ResizePolicy,
{
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let guard = Guard::new();
        let mut map = serializer.serialize_map(Some(self.len()))?;
        for (k, v) in self.iter(&guard) {
            map.serialize_entry(k, v)?;
        }
        map.end()
    }
}
