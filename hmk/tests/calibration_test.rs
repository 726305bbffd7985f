mod common;

use common::*;
use rusty_fork::rusty_fork_test;

rusty_fork_test! {

    #[test]
    fn test_bottom_out_thresholds_persist_after_inactivity() {
        let mut eeconfig = base_eeconfig();
        eeconfig.calibration.initial_bottom_out_threshold = 150;
        eeconfig.options = eeconfig.options.with_save_bottom_out_threshold(true);
        let mut rig = TestRig::new(eeconfig);

        // A deep press raises the learned bottom-out endpoint of key 0
        rig.analog.set(0, 200);
        rig.cycle();
        rig.analog.release(0);
        rig.cycle();
        assert!(rig.store.thresholds().is_empty());

        // Once the endpoints have been quiet for the inactivity window,
        // the per-key deltas go to the store and the RAM config
        advance_ms(60_000);
        rig.cycle();

        let mut expected = [150u16; KEYS];
        expected[0] = 200;
        assert_eq!(rig.store.thresholds(), vec![expected.to_vec()]);
        assert_eq!(rig.keyboard.eeconfig().bottom_out_threshold, expected);

        // The save rearms the inactivity timer instead of re-writing
        rig.run_ms(5);
        assert_eq!(rig.store.thresholds().len(), 1);
    }

    #[test]
    fn test_threshold_save_is_gated_by_the_option() {
        let mut eeconfig = base_eeconfig();
        eeconfig.calibration.initial_bottom_out_threshold = 150;
        let mut rig = TestRig::new(eeconfig);

        rig.analog.set(0, 200);
        rig.cycle();
        rig.analog.release(0);
        rig.cycle();

        advance_ms(60_000);
        rig.cycle();
        assert!(rig.store.thresholds().is_empty());
    }

    #[test]
    fn test_recalibrate_with_reset_clears_and_persists_thresholds() {
        let mut eeconfig = base_eeconfig();
        eeconfig.calibration.initial_bottom_out_threshold = 100;
        eeconfig.bottom_out_threshold = [120; KEYS];
        let mut rig = TestRig::new(eeconfig);

        // The stored per-key threshold dominates the initial one
        assert_eq!(rig.keyboard.matrix().key(0).adc_bottom_out_value, 120);

        rig.keyboard.recalibrate(true);

        // Reset applied to the RAM config and the matrix, and persisted
        assert_eq!(rig.keyboard.eeconfig().bottom_out_threshold, [0; KEYS]);
        assert_eq!(rig.store.thresholds(), vec![vec![0u16; KEYS]]);
        assert_eq!(rig.keyboard.matrix().key(0).adc_bottom_out_value, 100);
    }

    #[test]
    fn test_recalibrate_without_reset_keeps_thresholds() {
        let mut eeconfig = base_eeconfig();
        eeconfig.calibration.initial_bottom_out_threshold = 100;
        eeconfig.bottom_out_threshold = [120; KEYS];
        let mut rig = TestRig::new(eeconfig);

        rig.keyboard.recalibrate(false);

        assert_eq!(rig.keyboard.eeconfig().bottom_out_threshold, [120; KEYS]);
        assert!(rig.store.thresholds().is_empty());
        assert_eq!(rig.keyboard.matrix().key(0).adc_bottom_out_value, 120);
    }
}
