//! Image handles and render targets with explicit attachment ownership.
//!
//! Images live in an [`ImageTable`] and are referred to by generational
//! [`ImageId`]s, so swapping two logical buffers only swaps two ids. A
//! [`RenderTarget`] groups the images one pass writes. Each attachment is
//! either [`Ownership::Owned`] (the target releases the image at teardown) or
//! [`Ownership::Borrowed`] (the image belongs to another target and must
//! outlive this one).

use crate::error::ScreenProbeError;

/// Generational handle into an [`ImageTable`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ImageId {
    index: u32,
    generation: u32,
}

struct Slot<I> {
    generation: u32,
    entry: Option<(&'static str, I)>,
}

/// Arena of live backend images.
pub struct ImageTable<I> {
    slots: Vec<Slot<I>>,
    free: Vec<u32>,
    live: usize,
}

impl<I> ImageTable<I> {
    /// Create an empty table.
    #[must_use]
    pub fn new() -> Self {
        Self {
            slots: Vec::new(),
            free: Vec::new(),
            live: 0,
        }
    }

    /// Take ownership of an image and return its handle.
    pub fn insert(&mut self, label: &'static str, image: I) -> ImageId {
        self.live += 1;
        if let Some(index) = self.free.pop() {
            let slot = &mut self.slots[index as usize];
            slot.entry = Some((label, image));
            return ImageId {
                index,
                generation: slot.generation,
            };
        }
        let index = self.slots.len() as u32;
        self.slots.push(Slot {
            generation: 0,
            entry: Some((label, image)),
        });
        ImageId {
            index,
            generation: 0,
        }
    }

    /// Look up a live image. Stale handles return `None`.
    #[must_use]
    pub fn get(&self, id: ImageId) -> Option<&I> {
        self.slots
            .get(id.index as usize)
            .filter(|slot| slot.generation == id.generation)
            .and_then(|slot| slot.entry.as_ref())
            .map(|(_, image)| image)
    }

    /// Whether a handle refers to a live image.
    #[must_use]
    pub fn contains(&self, id: ImageId) -> bool {
        self.get(id).is_some()
    }

    /// Debug label of a live image.
    #[must_use]
    pub fn label(&self, id: ImageId) -> Option<&'static str> {
        self.slots
            .get(id.index as usize)
            .filter(|slot| slot.generation == id.generation)
            .and_then(|slot| slot.entry.as_ref())
            .map(|(label, _)| *label)
    }

    /// Remove an image, handing it back for destruction.
    ///
    /// Releasing a handle twice is an error and leaves the table untouched.
    pub fn remove(&mut self, id: ImageId) -> Result<I, ScreenProbeError> {
        let slot = self
            .slots
            .get_mut(id.index as usize)
            .filter(|slot| slot.generation == id.generation && slot.entry.is_some())
            .ok_or(ScreenProbeError::DoubleRelease { image: id })?;
        let Some((_, image)) = slot.entry.take() else {
            return Err(ScreenProbeError::DoubleRelease { image: id });
        };
        slot.generation = slot.generation.wrapping_add(1);
        self.free.push(id.index);
        self.live -= 1;
        Ok(image)
    }

    /// Remove every live image, e.g. to unwind a failed allocation.
    pub fn drain(&mut self) -> Vec<(&'static str, I)> {
        let mut drained = Vec::with_capacity(self.live);
        for (index, slot) in self.slots.iter_mut().enumerate() {
            if let Some(entry) = slot.entry.take() {
                slot.generation = slot.generation.wrapping_add(1);
                self.free.push(index as u32);
                drained.push(entry);
            }
        }
        self.live = 0;
        drained
    }

    /// Number of live images.
    #[must_use]
    pub fn len(&self) -> usize {
        self.live
    }

    /// Whether the table holds no images.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.live == 0
    }

    /// Labels of every live image.
    pub fn live_labels(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.slots
            .iter()
            .filter_map(|slot| slot.entry.as_ref().map(|(label, _)| *label))
    }
}

impl<I> Default for ImageTable<I> {
    fn default() -> Self {
        Self::new()
    }
}

/// Who releases an attachment's image.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Ownership {
    /// Released together with the render target.
    Owned,
    /// Owned by another target; never released through this one.
    Borrowed,
}

/// One color attachment of a render target.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Attachment {
    pub image: ImageId,
    pub ownership: Ownership,
}

/// A set of images bound together as the outputs of one pass.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RenderTarget {
    label: &'static str,
    attachments: Vec<Attachment>,
}

impl RenderTarget {
    /// Target owning every listed image.
    #[must_use]
    pub fn owning(label: &'static str, images: &[ImageId]) -> Self {
        Self::with_ownership(label, images, Ownership::Owned)
    }

    /// Target borrowing every listed image from other targets.
    #[must_use]
    pub fn borrowing(label: &'static str, images: &[ImageId]) -> Self {
        Self::with_ownership(label, images, Ownership::Borrowed)
    }

    fn with_ownership(label: &'static str, images: &[ImageId], ownership: Ownership) -> Self {
        Self {
            label,
            attachments: images
                .iter()
                .map(|&image| Attachment { image, ownership })
                .collect(),
        }
    }

    /// Debug label.
    #[must_use]
    pub fn label(&self) -> &'static str {
        self.label
    }

    /// Attachments in binding order.
    #[must_use]
    pub fn attachments(&self) -> &[Attachment] {
        &self.attachments
    }

    /// Image bound at `slot`.
    #[must_use]
    pub fn image(&self, slot: usize) -> Option<ImageId> {
        self.attachments.get(slot).map(|a| a.image)
    }

    /// Whether any attachment is owned by this target.
    #[must_use]
    pub fn owns_any(&self) -> bool {
        self.attachments
            .iter()
            .any(|a| a.ownership == Ownership::Owned)
    }

    /// Tear the target down, moving owned images from `table` into
    /// `released` for destruction.
    ///
    /// Borrowed attachments are left alone; their images must still be live,
    /// otherwise the owner was torn down first. A bad attachment does not stop
    /// the teardown: every other owned image still lands in `released`, and
    /// the first error is returned.
    pub fn release<I>(
        self,
        table: &mut ImageTable<I>,
        released: &mut Vec<I>,
    ) -> Result<(), ScreenProbeError> {
        let mut first_error = None;
        for attachment in self.attachments {
            let outcome = match attachment.ownership {
                Ownership::Owned => table
                    .remove(attachment.image)
                    .map(|image| released.push(image)),
                Ownership::Borrowed if table.contains(attachment.image) => Ok(()),
                Ownership::Borrowed => Err(ScreenProbeError::DanglingBorrow {
                    target: self.label,
                    image: attachment.image,
                }),
            };
            if let Err(err) = outcome {
                first_error.get_or_insert(err);
            }
        }
        first_error.map_or(Ok(()), Err)
    }
}
