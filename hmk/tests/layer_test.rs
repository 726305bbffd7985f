mod common;

use common::*;
use hmk::keycode::Keycode;
use rusty_fork::rusty_fork_test;

const MO_KEY: usize = 10;

fn layer_config() -> TestEeconfig {
    let mut eeconfig = base_eeconfig();
    eeconfig.profiles[0].keymap[0][MO_KEY] = Keycode::mo(1);
    eeconfig.profiles[0].keymap[1][2] = Keycode(0x20);
    eeconfig.profiles[0].keymap[1][3] = Keycode::TRANSPARENT;
    eeconfig
}

rusty_fork_test! {

    #[test]
    fn test_momentary_layer() {
        let mut rig = TestRig::new(layer_config());

        rig.press(MO_KEY);
        rig.run_ms(5);
        rig.press(2);
        rig.run_ms(5);
        rig.release(2);
        rig.run_ms(5);
        rig.release(MO_KEY);
        rig.run_ms(5);
        rig.press(2);

        // Layer 1 binding while held, base binding afterwards
        assert_eq!(rig.hid.added(0x20), vec![5]);
        assert_eq!(rig.hid.removed(0x20), vec![10]);
        assert_eq!(rig.hid.added(base_keycode(2)), vec![20]);
    }

    #[test]
    fn test_release_uses_the_keycode_captured_at_press() {
        let mut rig = TestRig::new(layer_config());

        rig.press(MO_KEY);
        rig.run_ms(5);
        rig.press(2);
        rig.run_ms(5);
        // Dropping the layer first must not change the release target
        rig.release(MO_KEY);
        rig.run_ms(5);
        rig.release(2);

        assert_eq!(rig.hid.added(0x20), vec![5]);
        assert_eq!(rig.hid.removed(0x20), vec![15]);
        assert!(rig.hid.added(base_keycode(2)).is_empty());
    }

    #[test]
    fn test_transparent_falls_through_to_the_base_layer() {
        let mut rig = TestRig::new(layer_config());

        rig.press(MO_KEY);
        rig.run_ms(5);
        rig.press(3);

        assert_eq!(rig.hid.added(base_keycode(3)), vec![5]);
    }

    #[test]
    fn test_unmapped_layer_entry_does_nothing() {
        let mut rig = TestRig::new(layer_config());

        rig.press(MO_KEY);
        rig.run_ms(5);
        // Key 4 has no binding on layer 1 (and is not transparent)
        rig.press(4);
        rig.run_ms(5);
        rig.release(4);

        assert!(rig.hid.keycode_ops().is_empty());
    }

    #[test]
    fn test_layer_lock_pins_the_default_layer() {
        let mut eeconfig = layer_config();
        eeconfig.profiles[0].keymap[1][4] = Keycode::LAYER_LOCK;
        let mut rig = TestRig::new(eeconfig);

        rig.press(MO_KEY);
        rig.run_ms(5);
        rig.press(4);
        rig.run_ms(5);
        rig.release(4);
        rig.release(MO_KEY);
        rig.run_ms(5);

        // Layer 1 is now the default even with the momentary key released
        assert_eq!(rig.keyboard.keymap().current_layer(), 1);
        rig.press(2);
        assert_eq!(rig.hid.added(0x20), vec![15]);
        rig.release(2);

        // Locking again while the locked layer is current resets to 0
        rig.run_ms(5);
        rig.press(4);
        rig.run_ms(5);
        rig.release(4);
        assert_eq!(rig.keyboard.keymap().current_layer(), 0);
    }

    #[test]
    fn test_key_lock_disables_a_key_on_the_base_layer() {
        let mut eeconfig = layer_config();
        eeconfig.profiles[0].keymap[0][6] = Keycode::KEY_LOCK;
        eeconfig.profiles[0].keymap[1][6] = Keycode(0x30);
        let mut rig = TestRig::new(eeconfig);

        // The key locks itself on press
        rig.press(6);
        rig.run_ms(5);
        rig.release(6);
        rig.run_ms(5);
        rig.press(6);
        rig.run_ms(5);
        assert!(rig.hid.keycode_ops().is_empty());
        rig.release(6);
        rig.run_ms(5);

        // The disable bit only applies on layer 0
        rig.press(MO_KEY);
        rig.run_ms(5);
        rig.press(6);
        rig.run_ms(5);
        rig.release(6);

        assert_eq!(rig.hid.added(0x30), vec![25]);
        assert_eq!(rig.hid.removed(0x30), vec![30]);
    }
}
