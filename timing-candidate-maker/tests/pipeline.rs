// Copyright (c) James Kassemi, SC, US. All rights reserved.
use std::{
    sync::Arc,
    thread,
    time::{Duration, Instant},
};

use core_types::{
    LinkConfig, ModuleLevelTriggerConfig, SignalOffsets, TimeStampedData,
    TimingCandidateMakerConfig, TriggerCandidate, TriggerDecision, TriggerInhibit,
};
use engine_api::Engine;
use module_level_trigger::ModuleLevelTrigger;
use timing_candidate_maker::TimingCandidateMaker;
use trigger_io::{ConnectionHub, MessageReceiver, MessageSender};

#[test]
fn timing_signals_become_trigger_decisions() {
    let hub = Arc::new(ConnectionHub::new());
    hub.register_queue::<TimeStampedData>("timing_data", 16).unwrap();
    hub.register_queue::<TriggerCandidate>("trigger_candidates", 16)
        .unwrap();
    hub.register_queue::<TriggerDecision>("trigger_decisions", 16)
        .unwrap();
    hub.register_signal::<TriggerInhibit>("dfo_busy", 16).unwrap();

    let maker =
        TimingCandidateMaker::new("tcm", &hub, "timing_data", "trigger_candidates").unwrap();
    maker
        .configure(&TimingCandidateMakerConfig {
            signals: vec![SignalOffsets {
                signal_type: 3,
                time_before: 1_000,
                time_after: 2_000,
            }],
        })
        .unwrap();
    let mlt = ModuleLevelTrigger::new("mlt", Arc::clone(&hub), "trigger_candidates").unwrap();
    mlt.configure(&ModuleLevelTriggerConfig {
        links: vec![LinkConfig {
            system: "DataSelection".to_string(),
            region: 0,
            element: 0,
        }],
        hsi_trigger_type_passthrough: true,
        ..Default::default()
    })
    .unwrap();

    mlt.start(11).unwrap();
    maker.start(11).unwrap();
    mlt.enable_triggers().unwrap();

    let timing = hub.queue_sender::<TimeStampedData>("timing_data").unwrap();
    for (i, time_stamp) in [50_000u64, 60_000].into_iter().enumerate() {
        timing
            .send(
                TimeStampedData {
                    time_stamp,
                    signal_type: 3,
                    counter: i as u32,
                },
                Duration::from_millis(100),
            )
            .unwrap();
    }

    let decisions = hub
        .queue_receiver::<TriggerDecision>("trigger_decisions")
        .unwrap();
    let first = decisions.try_receive(Duration::from_secs(2)).unwrap();
    let second = decisions.try_receive(Duration::from_secs(2)).unwrap();
    assert_eq!(first.trigger_number, 1);
    assert_eq!(first.run_number, 11);
    assert_eq!(first.trigger_type, 3);
    assert_eq!(first.trigger_timestamp, 50_000);
    assert_eq!(first.components[0].window_begin, 49_000);
    assert_eq!(first.components[0].window_end, 52_000);
    assert_eq!(second.trigger_number, 2);
    assert_eq!(second.trigger_timestamp, 60_000);

    let deadline = Instant::now() + Duration::from_secs(2);
    while maker.metrics_snapshot().candidates_sent < 2 {
        assert!(Instant::now() < deadline);
        thread::sleep(Duration::from_millis(5));
    }
    maker.stop().unwrap();
    mlt.stop().unwrap();
    assert_eq!(mlt.metrics_snapshot().decisions_sent, 2);
}
