use sha2::{Digest, Sha256};
use std::collections::BTreeMap;

use crate::ImageData;

/// Content-addressed asset ID computed from the pixel data.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct AssetId(pub u64);

impl AssetId {
    /// First eight bytes of SHA-256 over the dimensions and pixels.
    pub fn of(image: &ImageData) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(image.width.to_le_bytes());
        hasher.update(image.height.to_le_bytes());
        hasher.update(&image.pixels);
        let result = hasher.finalize();
        let mut bytes = [0u8; 8];
        bytes.copy_from_slice(&result[..8]);
        Self(u64::from_le_bytes(bytes))
    }
}

/// Maps image content plus a sampling key to whatever handle a backend
/// issued for it.
///
/// The same pixels requested under two different keys (for example two
/// filter modes) get two handles.
#[derive(Debug, Clone)]
pub struct TextureRegistry<K, H> {
    handles: BTreeMap<(AssetId, K), H>,
}

impl<K, H> Default for TextureRegistry<K, H> {
    fn default() -> Self {
        Self {
            handles: BTreeMap::new(),
        }
    }
}

impl<K: Ord + Copy, H: Copy> TextureRegistry<K, H> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Return the handle for `image` under `key`, creating it with `create`
    /// on first sight.
    ///
    /// `create` is not called when identical content is already registered
    /// under the same key.
    pub fn get_or_insert_with<E>(
        &mut self,
        image: &ImageData,
        key: K,
        create: impl FnOnce(&ImageData) -> Result<H, E>,
    ) -> Result<(AssetId, H), E> {
        let id = AssetId::of(image);
        if let Some(handle) = self.handles.get(&(id, key)) {
            tracing::debug!("texture {:#x} already registered", id.0);
            return Ok((id, *handle));
        }
        let handle = create(image)?;
        self.handles.insert((id, key), handle);
        Ok((id, handle))
    }

    pub fn get(&self, id: AssetId, key: K) -> Option<H> {
        self.handles.get(&(id, key)).copied()
    }

    pub fn remove(&mut self, id: AssetId, key: K) -> Option<H> {
        self.handles.remove(&(id, key))
    }

    /// Forget every entry pointing at `handle`.
    pub fn remove_handle(&mut self, handle: H) -> bool
    where
        H: PartialEq,
    {
        let before = self.handles.len();
        self.handles.retain(|_, h| *h != handle);
        self.handles.len() != before
    }

    pub fn len(&self) -> usize {
        self.handles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::convert::Infallible;

    #[test]
    fn identical_content_dedups() {
        let mut registry = TextureRegistry::new();
        let mut created = 0;
        let img = ImageData::solid(2, 2, [1, 2, 3, 4]);

        let (id1, h1) = registry
            .get_or_insert_with(&img, (), |_| {
                created += 1;
                Ok::<_, Infallible>(7u32)
            })
            .unwrap();
        let (id2, h2) = registry
            .get_or_insert_with(&img.clone(), (), |_| {
                created += 1;
                Ok::<_, Infallible>(8u32)
            })
            .unwrap();

        assert_eq!(id1, id2);
        assert_eq!((h1, h2), (7, 7));
        assert_eq!(created, 1);
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn different_content_different_ids() {
        let a = ImageData::solid(2, 2, [0, 0, 0, 255]);
        let b = ImageData::solid(2, 2, [0, 0, 1, 255]);
        let c = ImageData::solid(1, 4, [0, 0, 0, 255]);
        assert_ne!(AssetId::of(&a), AssetId::of(&b));
        // Same bytes, different shape.
        assert_ne!(AssetId::of(&a), AssetId::of(&c));
    }

    #[test]
    fn failed_create_is_not_registered() {
        let mut registry: TextureRegistry<(), u32> = TextureRegistry::new();
        let img = ImageData::white_pixel();
        let res = registry.get_or_insert_with(&img, (), |_| Err("boom"));
        assert_eq!(res.unwrap_err(), "boom");
        assert!(registry.is_empty());
    }

    #[test]
    fn remove_forgets_handle() {
        let mut registry = TextureRegistry::new();
        let img = ImageData::white_pixel();
        let (id, _) = registry
            .get_or_insert_with(&img, (), |_| Ok::<_, Infallible>(1u8))
            .unwrap();
        assert_eq!(registry.get(id, ()), Some(1));
        assert_eq!(registry.remove(id, ()), Some(1));
        assert_eq!(registry.get(id, ()), None);
    }

    #[test]
    fn remove_by_handle() {
        let mut registry = TextureRegistry::new();
        registry
            .get_or_insert_with(&ImageData::white_pixel(), (), |_| Ok::<_, Infallible>(4u8))
            .unwrap();
        assert!(!registry.remove_handle(5));
        assert!(registry.remove_handle(4));
        assert!(registry.is_empty());
    }

    #[test]
    fn same_content_different_key_is_distinct() {
        let mut registry = TextureRegistry::new();
        let img = ImageData::solid(2, 2, [7, 7, 7, 255]);
        let mut created = Vec::new();
        for key in ['n', 'l', 'n'] {
            let (_, handle) = registry
                .get_or_insert_with(&img, key, |_| {
                    created.push(key);
                    Ok::<_, Infallible>(created.len())
                })
                .unwrap();
            assert_eq!(handle, if key == 'n' { 1 } else { 2 });
        }
        assert_eq!(created, vec!['n', 'l']);
        assert_eq!(registry.len(), 2);
    }
}
