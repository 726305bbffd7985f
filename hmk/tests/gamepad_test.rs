mod common;

use common::*;
use hmk::eeconfig::GamepadOptions;
use hmk::keycode::Keycode;
use rusty_fork::rusty_fork_test;

const MO_KEY: usize = 10;

fn gamepad_config(gamepad_options: GamepadOptions, xinput_enabled: bool) -> TestEeconfig {
    let mut eeconfig = base_eeconfig();
    eeconfig.options = eeconfig.options.with_xinput_enabled(xinput_enabled);
    eeconfig.profiles[0].gamepad_buttons[0] = 1;
    eeconfig.profiles[0].gamepad_options = gamepad_options;
    eeconfig.profiles[0].keymap[0][MO_KEY] = Keycode::mo(1);
    eeconfig.profiles[0].keymap[1][0] = Keycode(0x20);
    eeconfig
}

rusty_fork_test! {

    #[test]
    fn test_gamepad_override_swallows_mapped_keys_on_layer_0() {
        let mut rig = TestRig::new(gamepad_config(
            GamepadOptions::default().with_gamepad_override(true),
            true,
        ));

        // The gamepad-mapped key never reaches the layout
        rig.press(0);
        rig.run_ms(5);
        rig.release(0);
        rig.run_ms(5);
        assert!(rig.hid.keycode_ops().is_empty());

        // Unmapped keys are unaffected
        rig.press(1);
        assert_eq!(rig.hid.added(base_keycode(1)), vec![10]);
        rig.release(1);

        // The override only applies to layer 0
        rig.run_ms(5);
        rig.press(MO_KEY);
        rig.run_ms(5);
        rig.press(0);
        assert_eq!(rig.hid.added(0x20), vec![20]);
    }

    #[test]
    fn test_keyboard_disabled_profile_ignores_all_keys() {
        let mut rig = TestRig::new(gamepad_config(
            GamepadOptions::default().with_keyboard_enabled(false),
            true,
        ));

        rig.press(0);
        rig.run_ms(5);
        rig.press(1);
        rig.run_ms(5);
        // Even the momentary layer key is gated
        rig.press(MO_KEY);
        rig.run_ms(5);

        assert!(rig.hid.keycode_ops().is_empty());
        assert_eq!(rig.keyboard.keymap().current_layer(), 0);
    }

    #[test]
    fn test_gating_is_inert_without_xinput() {
        let mut rig = TestRig::new(gamepad_config(
            GamepadOptions::default().with_gamepad_override(true),
            false,
        ));

        rig.press(0);
        assert_eq!(rig.hid.added(base_keycode(0)), vec![0]);
    }
}
