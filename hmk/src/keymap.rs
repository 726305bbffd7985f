use crate::keycode::Keycode;

/// The layer stack: an active-layer mask plus a default layer.
///
/// The current layer is the highest active layer in the mask, falling back
/// to the default layer when the mask is empty. Keycode resolution walks the
/// active layers downwards until it finds a non-transparent entry.
pub struct Keymap<const NUM_LAYERS: usize, const NUM_KEYS: usize> {
    /// Each bit represents whether a layer is active
    layer_mask: u8,
    default_layer: u8,
}

impl<const NUM_LAYERS: usize, const NUM_KEYS: usize> Default for Keymap<NUM_LAYERS, NUM_KEYS> {
    fn default() -> Self {
        Self::new()
    }
}

impl<const NUM_LAYERS: usize, const NUM_KEYS: usize> Keymap<NUM_LAYERS, NUM_KEYS> {
    pub fn new() -> Self {
        Self { layer_mask: 0, default_layer: 0 }
    }

    /// The highest active layer, or the default layer if none is active.
    pub fn current_layer(&self) -> u8 {
        if self.layer_mask != 0 {
            7 - self.layer_mask.leading_zeros() as u8
        } else {
            self.default_layer
        }
    }

    pub fn default_layer(&self) -> u8 {
        self.default_layer
    }

    pub(crate) fn layer_on(&mut self, layer: u8) {
        if layer as usize >= NUM_LAYERS {
            warn!("Not a valid layer {}, keyboard supports only {} layers", layer, NUM_LAYERS);
            return;
        }
        self.layer_mask |= 1 << layer;
    }

    pub(crate) fn layer_off(&mut self, layer: u8) {
        if layer as usize >= NUM_LAYERS {
            warn!("Not a valid layer {}, keyboard supports only {} layers", layer, NUM_LAYERS);
            return;
        }
        self.layer_mask &= !(1 << layer);
    }

    /// Lock the current layer as the default layer, or reset the default
    /// layer to 0 if the current layer is already the default.
    pub(crate) fn layer_lock(&mut self) {
        let current_layer = self.current_layer();
        self.default_layer = if current_layer == self.default_layer { 0 } else { current_layer };
    }

    /// Resolve the keycode of a key against a profile keymap.
    ///
    /// Walks the active layers from the current layer downwards and returns
    /// the first non-transparent entry; when every active layer is
    /// transparent, returns the default layer's entry as-is.
    pub fn resolve(&self, layers: &[[Keycode; NUM_KEYS]; NUM_LAYERS], key: usize) -> Keycode {
        if key >= NUM_KEYS {
            return Keycode::NO;
        }

        let current_layer = self.current_layer();
        for i in (0..=current_layer.min(NUM_LAYERS as u8 - 1)).rev() {
            if self.layer_mask >> i & 1 == 0 {
                // Layer is not active
                continue;
            }

            let keycode = layers[i as usize][key];
            if keycode != Keycode::TRANSPARENT {
                return keycode;
            }
        }

        layers[self.default_layer as usize][key]
    }
}

#[cfg(test)]
mod test {
    use super::*;

    const A: Keycode = Keycode(0x04);
    const B: Keycode = Keycode(0x05);
    const C: Keycode = Keycode(0x06);

    fn layers() -> [[Keycode; 2]; 4] {
        [
            [A, B],
            [Keycode::TRANSPARENT, C],
            [Keycode::TRANSPARENT, Keycode::TRANSPARENT],
            [C, Keycode::NO],
        ]
    }

    #[test]
    fn test_current_layer_is_highest_active() {
        let mut keymap: Keymap<4, 2> = Keymap::new();
        assert_eq!(keymap.current_layer(), 0);
        keymap.layer_on(1);
        keymap.layer_on(3);
        assert_eq!(keymap.current_layer(), 3);
        keymap.layer_off(3);
        assert_eq!(keymap.current_layer(), 1);
        keymap.layer_off(1);
        assert_eq!(keymap.current_layer(), 0);
    }

    #[test]
    fn test_out_of_range_layer_is_ignored() {
        let mut keymap: Keymap<4, 2> = Keymap::new();
        keymap.layer_on(7);
        assert_eq!(keymap.current_layer(), 0);
    }

    #[test]
    fn test_transparent_falls_through_active_layers() {
        let layers = layers();
        let mut keymap: Keymap<4, 2> = Keymap::new();

        keymap.layer_on(2);
        // Layer 2 is fully transparent and no lower layer is active:
        // fall back to the default layer
        assert_eq!(keymap.resolve(&layers, 0), A);

        keymap.layer_on(1);
        // Layer 1 resolves key 1, key 0 falls through to the default
        assert_eq!(keymap.resolve(&layers, 1), C);
        assert_eq!(keymap.resolve(&layers, 0), A);
    }

    #[test]
    fn test_layer_lock_toggles_default() {
        let mut keymap: Keymap<4, 2> = Keymap::new();
        keymap.layer_on(3);
        keymap.layer_lock();
        assert_eq!(keymap.default_layer(), 3);

        keymap.layer_off(3);
        assert_eq!(keymap.current_layer(), 3);

        // Locking again while the current layer is the default resets it
        keymap.layer_lock();
        assert_eq!(keymap.default_layer(), 0);
    }
}
