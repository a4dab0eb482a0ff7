//! Bindless texture table.
//!
//! One descriptor set holds a large combined-image-sampler array. Textures are
//! registered into integer slots and shaders index the array with the slot
//! number, so draws never switch texture descriptor sets.

use std::sync::Arc;

use ash::vk;
use parking_lot::Mutex;

use crate::error::{GraphicsError, GraphicsResult};
use crate::resources::{
    DescriptorSet, DescriptorSetLayout, DescriptorSetLayoutBuilder, Sampler, SamplerBuilder,
    Texture,
};
use crate::vulkan::{DeviceContext, ImageLayout};

/// Default number of slots in the texture table.
pub const DEFAULT_BINDLESS_CAPACITY: u32 = 4096;

/// Index of a texture in the bindless table, as seen by shaders.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BindlessSlot(u32);

impl BindlessSlot {
    pub fn index(self) -> u32 {
        self.0
    }
}

/// Fixed-capacity slot table with a presence bitset.
///
/// Allocation takes the lowest free slot. Any change marks the table dirty
/// until [`take_dirty`](Self::take_dirty) is called.
#[derive(Debug)]
pub struct BindlessSlots<T> {
    entries: Vec<Option<T>>,
    present: Vec<u64>,
    live: u32,
    dirty: bool,
}

impl<T> BindlessSlots<T> {
    pub fn new(capacity: u32) -> Self {
        let mut entries = Vec::with_capacity(capacity as usize);
        entries.resize_with(capacity as usize, || None);
        Self {
            entries,
            present: vec![0; (capacity as usize).div_ceil(64)],
            live: 0,
            dirty: false,
        }
    }

    pub fn capacity(&self) -> u32 {
        self.entries.len() as u32
    }

    /// Number of allocated slots.
    pub fn len(&self) -> u32 {
        self.live
    }

    pub fn is_empty(&self) -> bool {
        self.live == 0
    }

    pub fn is_present(&self, slot: BindlessSlot) -> bool {
        let index = slot.0 as usize;
        index < self.entries.len() && self.present[index / 64] & (1 << (index % 64)) != 0
    }

    fn first_free(&self) -> Option<usize> {
        self.present
            .iter()
            .enumerate()
            .find(|(_, word)| **word != u64::MAX)
            .map(|(i, word)| i * 64 + word.trailing_ones() as usize)
            .filter(|&index| index < self.entries.len())
    }

    /// Store `value` in the lowest free slot.
    pub fn allocate(&mut self, value: T) -> GraphicsResult<BindlessSlot> {
        let index = self
            .first_free()
            .ok_or(GraphicsError::BindlessTableFull {
                capacity: self.capacity(),
            })?;
        self.present[index / 64] |= 1 << (index % 64);
        self.entries[index] = Some(value);
        self.live += 1;
        self.dirty = true;
        Ok(BindlessSlot(index as u32))
    }

    /// Replace the value of an allocated slot, returning the old one.
    ///
    /// # Panics
    ///
    /// Panics if `slot` is not allocated.
    pub fn set(&mut self, slot: BindlessSlot, value: T) -> Option<T> {
        assert!(self.is_present(slot), "bindless slot {} is not allocated", slot.0);
        self.dirty = true;
        self.entries[slot.0 as usize].replace(value)
    }

    /// Release a slot for reuse, returning its value.
    ///
    /// # Panics
    ///
    /// Panics if `slot` is not allocated.
    pub fn free(&mut self, slot: BindlessSlot) -> Option<T> {
        assert!(self.is_present(slot), "bindless slot {} is not allocated", slot.0);
        let index = slot.0 as usize;
        self.present[index / 64] &= !(1 << (index % 64));
        self.live -= 1;
        self.dirty = true;
        self.entries[index].take()
    }

    pub fn get(&self, slot: BindlessSlot) -> Option<&T> {
        self.entries.get(slot.0 as usize)?.as_ref()
    }

    /// Allocated slots in ascending order.
    pub fn iter(&self) -> impl Iterator<Item = (BindlessSlot, &T)> {
        self.entries
            .iter()
            .enumerate()
            .filter_map(|(i, entry)| entry.as_ref().map(|value| (BindlessSlot(i as u32), value)))
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    /// Clear the dirty flag, returning whether it was set.
    pub fn take_dirty(&mut self) -> bool {
        std::mem::take(&mut self.dirty)
    }
}

/// The bindless texture table and its descriptor set.
///
/// Slot management is thread-safe. [`update_descriptors_if_necessary`] is meant
/// to be called once per frame by the renderer before recording draws.
///
/// ```ignore
/// let bindless = BindlessTextureManager::new(core.handles(), DEFAULT_BINDLESS_CAPACITY);
/// let slot = bindless.allocate_texture_handle(albedo)?;
/// // once per frame
/// bindless.update_descriptors_if_necessary();
/// cmd.bind_descriptor_set(vk::PipelineBindPoint::GRAPHICS, &layout, 1, bindless.descriptor_set());
/// ```
///
/// [`update_descriptors_if_necessary`]: Self::update_descriptors_if_necessary
pub struct BindlessTextureManager {
    layout: Arc<DescriptorSetLayout>,
    set: DescriptorSet,
    sampler: Sampler,
    slots: Mutex<BindlessSlots<Arc<Texture>>>,
}

impl BindlessTextureManager {
    pub fn new(context: &Arc<DeviceContext>, capacity: u32) -> Self {
        let layout = DescriptorSetLayoutBuilder::new()
            .binding(
                0,
                vk::DescriptorType::COMBINED_IMAGE_SAMPLER,
                capacity,
                vk::ShaderStageFlags::ALL,
            )
            .partially_bound()
            .update_after_bind()
            .build(context);
        let set = DescriptorSet::new(context, &layout, None);
        let sampler = SamplerBuilder::new().max_anisotropy(16.0).build(context);
        context.set_object_name(set.handle(), "bindless textures");

        log::debug!("Bindless texture table created with {capacity} slots");

        Self {
            layout,
            set,
            sampler,
            slots: Mutex::new(BindlessSlots::new(capacity)),
        }
    }

    /// Register a texture in the lowest free slot.
    pub fn allocate_texture_handle(&self, texture: Arc<Texture>) -> GraphicsResult<BindlessSlot> {
        self.slots.lock().allocate(texture)
    }

    /// Point an allocated slot at a different texture, keeping its index.
    pub fn set_texture_at(&self, slot: BindlessSlot, texture: Arc<Texture>) {
        self.slots.lock().set(slot, texture);
    }

    pub fn free_texture_handle(&self, slot: BindlessSlot) {
        self.slots.lock().free(slot);
    }

    pub fn texture(&self, slot: BindlessSlot) -> Option<Arc<Texture>> {
        self.slots.lock().get(slot).cloned()
    }

    /// Rewrite the descriptor of every allocated slot if anything changed.
    pub fn update_descriptors_if_necessary(&self) {
        crate::profile_scope!("bindless_update");

        let mut slots = self.slots.lock();
        if !slots.take_dirty() {
            return;
        }

        let updater = slots.iter().fold(self.set.updater(), |updater, (slot, texture)| {
            updater.add_texture_with_layout(
                0,
                slot.index(),
                texture,
                Some(&self.sampler),
                ImageLayout::ShaderReadOnly,
            )
        });
        log::trace!("Writing {} bindless descriptors", updater.len());
        updater.update();
    }

    pub fn descriptor_set(&self) -> &DescriptorSet {
        &self.set
    }

    pub fn layout(&self) -> &Arc<DescriptorSetLayout> {
        &self.layout
    }

    pub fn sampler(&self) -> &Sampler {
        &self.sampler
    }

    pub fn capacity(&self) -> u32 {
        self.slots.lock().capacity()
    }

    pub fn len(&self) -> u32 {
        self.slots.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

static_assertions::assert_impl_all!(BindlessTextureManager: Send, Sync);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_first_fit_and_reuse() {
        let mut slots = BindlessSlots::new(8);
        let a = slots.allocate("a").unwrap();
        let b = slots.allocate("b").unwrap();
        let c = slots.allocate("c").unwrap();
        assert_eq!((a.index(), b.index(), c.index()), (0, 1, 2));

        assert_eq!(slots.free(b), Some("b"));
        assert!(!slots.is_present(b));
        let d = slots.allocate("d").unwrap();
        assert_eq!(d.index(), 1);
        assert_eq!(slots.len(), 3);
    }

    #[test]
    fn test_full_table() {
        let mut slots = BindlessSlots::new(65);
        for _ in 0..65 {
            slots.allocate(()).unwrap();
        }
        assert_eq!(
            slots.allocate(()),
            Err(GraphicsError::BindlessTableFull { capacity: 65 })
        );

        slots.free(BindlessSlot(64));
        assert_eq!(slots.allocate(()).unwrap().index(), 64);
    }

    #[test]
    fn test_dirty_tracking() {
        let mut slots = BindlessSlots::new(4);
        assert!(!slots.is_dirty());

        let slot = slots.allocate(1).unwrap();
        assert!(slots.take_dirty());
        assert!(!slots.take_dirty());

        assert_eq!(slots.set(slot, 2), Some(1));
        assert!(slots.is_dirty());
        assert_eq!(slots.get(slot), Some(&2));
    }

    #[test]
    fn test_iter_skips_free_slots() {
        let mut slots = BindlessSlots::new(4);
        let a = slots.allocate('a').unwrap();
        slots.allocate('b').unwrap();
        slots.allocate('c').unwrap();
        slots.free(a);

        let live: Vec<_> = slots.iter().map(|(slot, v)| (slot.index(), *v)).collect();
        assert_eq!(live, vec![(1, 'b'), (2, 'c')]);
    }

    #[test]
    #[should_panic(expected = "not allocated")]
    fn test_set_unallocated_panics() {
        let mut slots = BindlessSlots::new(4);
        slots.set(BindlessSlot(2), 0);
    }

    #[test]
    #[should_panic(expected = "not allocated")]
    fn test_double_free_panics() {
        let mut slots = BindlessSlots::new(4);
        let slot = slots.allocate(0).unwrap();
        slots.free(slot);
        slots.free(slot);
    }
}
