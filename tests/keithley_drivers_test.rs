//! Driver behaviour against the mock adapter

use std::sync::Arc;

use probe_station::adapters::MockAdapter;
use probe_station::instrument::{FilterType, Keithley2182A, Keithley2400, Terminals};
use probe_station::ProbeError;

#[tokio::test]
async fn autorange_round_trip() {
    let mock = MockAdapter::new();
    let dmm = Keithley2182A::new("dmm", Arc::new(mock.clone()))
        .await
        .unwrap();

    dmm.autorange.set(true).await.unwrap();
    assert!(dmm.autorange.get().await.unwrap());
    assert_eq!(dmm.autorange.cached(), Some(true));

    dmm.autorange.set(false).await.unwrap();
    assert!(!dmm.autorange.get().await.unwrap());
}

#[tokio::test]
async fn unexpected_bool_token_is_parse_error() {
    let mock = MockAdapter::new();
    let dmm = Keithley2182A::new("dmm", Arc::new(mock.clone()))
        .await
        .unwrap();
    mock.push_response("SENS:VOLT:LPAS?", "MAYBE");

    assert!(matches!(
        dmm.filter.analog.get().await,
        Err(ProbeError::Parse { .. })
    ));
}

#[tokio::test]
async fn beep_rejects_out_of_range_arguments() {
    let mock = MockAdapter::new();
    let smu = Keithley2400::new("smu", Arc::new(mock.clone()))
        .await
        .unwrap();
    mock.clear_log();

    let rejected = [
        (Some(64.9), Some(1.0)),
        (Some(2_000_001.0), Some(1.0)),
        (Some(800.0), Some(-0.1)),
        (Some(800.0), Some(7.91)),
        (None, Some(1.0)),
        (Some(800.0), None),
        (None, None),
        (Some(f64::NAN), Some(1.0)),
        (Some(800.0), Some(f64::NAN)),
    ];
    for (frequency, duration) in rejected {
        assert!(
            matches!(
                smu.beeper.beep(frequency, duration).await,
                Err(ProbeError::InvalidArgument(_))
            ),
            "beep({:?}, {:?}) should be rejected",
            frequency,
            duration
        );
    }
    assert!(mock.call_log().is_empty());

    smu.beeper.beep(Some(800.0), Some(1.0)).await.unwrap();
    smu.beeper.success().await.unwrap();
    smu.beeper.beep(Some(2e6), Some(7.9)).await.unwrap();
    assert_eq!(
        mock.writes(),
        vec![
            ":SYST:BEEP 800,1",
            ":SYST:BEEP 800,1",
            ":SYST:BEEP 2000000,7.9",
        ]
    );
}

#[tokio::test]
async fn range_parameters_enforce_limits() {
    let mock = MockAdapter::new();
    let smu = Keithley2400::new("smu", Arc::new(mock.clone()))
        .await
        .unwrap();
    mock.clear_log();

    assert!(smu.rangev.set(211.0).await.is_err());
    assert!(smu.rangei.set(-1.1).await.is_err());
    assert!(smu.compliancev.set(f64::NAN).await.is_err());
    assert!(smu.compliancei.set(1.06).await.is_err());
    assert!(smu.nplci.set(0.001).await.is_err());
    assert!(mock.call_log().is_empty());

    smu.compliancei.set(1e-3).await.unwrap();
    smu.rangei.set(1.05).await.unwrap();
    assert_eq!(
        mock.writes(),
        vec![":SENS:CURR:PROT 0.001", ":SENS:CURR:RANG 1.05"]
    );
}

#[tokio::test]
async fn filter_settings_are_observable() {
    let mock = MockAdapter::new();
    let dmm = Keithley2182A::new("dmm", Arc::new(mock.clone()))
        .await
        .unwrap();

    assert_eq!(dmm.filter.state.cached(), Some(true));
    assert_eq!(dmm.filter.count.cached(), Some(1));

    let mut rx = dmm.filter.filter_type.subscribe();
    dmm.filter.filter_type.set(FilterType::Moving).await.unwrap();
    assert_eq!(*rx.borrow_and_update(), Some(FilterType::Moving));

    dmm.filter.count.set(10).await.unwrap();
    mock.push_response("SENS:VOLT:DFIL:COUN?", "+10");
    assert_eq!(dmm.filter.count.get().await.unwrap(), 10);
}

#[tokio::test]
async fn identity_query() {
    let mock = MockAdapter::new();
    mock.set_response(
        "*IDN?",
        "KEITHLEY INSTRUMENTS INC.,MODEL 2182A,1234567,C02  /A02",
    );
    let dmm = Keithley2182A::new("dmm", Arc::new(mock.clone()))
        .await
        .unwrap();

    let identity = dmm.identify().await.unwrap();
    assert_eq!(identity.model, "MODEL 2182A");
    assert_eq!(identity.serial, "1234567");

    mock.set_response("*IDN?", "");
    assert!(matches!(
        dmm.identify().await,
        Err(ProbeError::Parse { .. })
    ));
}

#[tokio::test]
async fn terminals_read_back_long_form() {
    let mock = MockAdapter::new();
    let smu = Keithley2400::new("smu", Arc::new(mock.clone()))
        .await
        .unwrap();

    mock.push_response(":ROUT:TERM?", "FRONT");
    assert_eq!(smu.terminals.get().await.unwrap(), Terminals::Front);

    mock.push_response(":ROUT:TERM?", "SIDE");
    assert!(matches!(
        smu.terminals.get().await,
        Err(ProbeError::Parse { .. })
    ));
}

#[tokio::test]
async fn construction_failure_is_communication_error() {
    let mock = MockAdapter::new();
    mock.inject_next_failure();

    let result = Keithley2400::new("smu", Arc::new(mock.clone())).await;
    assert!(matches!(result, Err(ProbeError::Communication(_))));
}
