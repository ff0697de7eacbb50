//! Expand/flatten helper tests.

use std::collections::BTreeMap;
use std::time::Duration;

use rstest::rstest;

use super::*;

const NETWORK: &str = "22222222-2222-2222-2222-222222222222";

fn zone(raw: &str) -> Locality {
    Locality::parse(raw).unwrap_or_else(|err| panic!("locality fixture: {err}"))
}

#[rstest]
#[case("30s", 30)]
#[case("5m", 300)]
#[case("1h", 3600)]
#[case("1h30m", 5400)]
#[case("0s", 0)]
#[case(" 90s ", 90)]
fn durations_parse_to_seconds(#[case] raw: &str, #[case] seconds: u64) {
    assert_eq!(parse_duration(raw), Ok(Duration::from_secs(seconds)));
}

#[rstest]
#[case("")]
#[case("5")]
#[case("5d")]
#[case("1.5s")]
#[case("m5")]
fn malformed_durations_are_rejected(#[case] raw: &str) {
    assert!(matches!(
        parse_duration(raw),
        Err(ExpandError::InvalidDuration { .. })
    ));
}

#[rstest]
fn negative_durations_are_rejected() {
    assert_eq!(
        parse_duration("-5s"),
        Err(ExpandError::NegativeDuration {
            value: String::from("-5s")
        })
    );
}

#[rstest]
fn duration_is_stable_through_flatten_and_expand() {
    let mut attrs = Attributes::new();
    attrs.set("timeout", "5m");
    let expanded = expand_duration(&attrs, "timeout").expect("valid");

    let mut flattened = Attributes::new();
    flatten_duration(&mut flattened, "timeout", expanded);
    assert_eq!(flattened.get("timeout"), Some(&Value::from("300s")));
    assert_eq!(expand_duration(&flattened, "timeout").expect("valid"), expanded);
}

#[rstest]
fn absent_and_zero_strings_differ() {
    let mut attrs = Attributes::new();
    attrs.set("description", "");
    assert_eq!(expand_string(&attrs, "description"), Ok(Some(String::new())));
    assert_eq!(expand_string(&attrs, "missing"), Ok(None));
}

#[rstest]
fn unknown_values_are_omitted() {
    let mut attrs = Attributes::new();
    attrs.set("description", Value::Unknown);
    assert_eq!(expand_string(&attrs, "description"), Ok(None));
}

#[rstest]
fn required_string_reports_its_name() {
    let err = expand_required_string(&Attributes::new(), "name").expect_err("missing");
    assert_eq!(err.to_string(), "attribute 'name' is required");
}

#[rstest]
fn type_mismatch_names_the_attribute() {
    let mut attrs = Attributes::new();
    attrs.set("min_scale", "three");
    let err = expand_optional::<i64>(&attrs, "min_scale").expect_err("not an int");
    assert_eq!(err.to_string(), "attribute 'min_scale': expected int, found string");
}

#[rstest]
fn empty_map_and_absent_map_are_distinct() {
    let mut attrs = Attributes::new();
    attrs.set("environment_variables", BTreeMap::<String, String>::new());
    assert_eq!(
        expand_map(&attrs, "environment_variables"),
        Ok(Some(BTreeMap::new()))
    );
    assert_eq!(expand_map(&Attributes::new(), "environment_variables"), Ok(None));
}

#[rstest]
fn empty_map_survives_flatten() {
    let mut attrs = Attributes::new();
    flatten_map(&mut attrs, "environment_variables", Some(BTreeMap::new()));
    flatten_map(&mut attrs, "secret_environment_variables", None);
    assert!(attrs.get("environment_variables").is_some());
    assert!(attrs.get("secret_environment_variables").is_none());
}

#[rstest]
#[case(NETWORK)]
#[case("fr-par/22222222-2222-2222-2222-222222222222")]
#[case("fr-par-1/22222222-2222-2222-2222-222222222222")]
fn ids_lose_their_prefix(#[case] raw: &str) {
    let mut attrs = Attributes::new();
    attrs.set("private_network_id", raw);
    let id = expand_id(&attrs, "private_network_id", &zone("fr-par-1")).expect("same locality");
    assert_eq!(id.map(|uuid| uuid.to_string()), Some(NETWORK.to_owned()));
}

#[rstest]
#[case("nl-ams/22222222-2222-2222-2222-222222222222")]
#[case("fr-par-2/22222222-2222-2222-2222-222222222222")]
fn cross_locality_references_are_rejected(#[case] raw: &str) {
    let mut attrs = Attributes::new();
    attrs.set("private_network_id", raw);
    let err = expand_id(&attrs, "private_network_id", &zone("fr-par-1")).expect_err("crossing");
    assert!(matches!(err, ExpandError::CrossLocality { .. }));
}

#[rstest]
fn ids_round_trip_through_flatten() {
    let locality = zone("fr-par");
    let mut attrs = Attributes::new();
    let uuid = parse_uuid(NETWORK).expect("uuid");
    flatten_id(&mut attrs, "namespace_id", &locality, Some(uuid));
    assert_eq!(expand_id(&attrs, "namespace_id", &locality), Ok(Some(uuid)));
}

#[rstest]
fn single_block_returns_first_item() {
    let block: Attributes = [("size", Value::Int(20))].into_iter().collect();
    let mut attrs = Attributes::new();
    flatten_single_block(&mut attrs, "root_volume", Some(block.clone()));
    assert_eq!(expand_single_block(&attrs, "root_volume", 1), Ok(Some(block)));
}

#[rstest]
fn single_block_enforces_max_items() {
    let block = Value::Block(Attributes::new());
    let mut attrs = Attributes::new();
    attrs.set("root_volume", Value::List(vec![block.clone(), block]));
    assert_eq!(
        expand_single_block(&attrs, "root_volume", 1),
        Err(ExpandError::TooManyItems {
            attribute: String::from("root_volume"),
            max: 1,
            found: 2,
        })
    );
}

#[rstest]
fn zone_references_to_regional_resources_use_the_zone_region() {
    assert_eq!(
        reference_locality(&zone("nl-ams-2"), LocalityKind::Region),
        Some(zone("nl-ams"))
    );
    assert_eq!(reference_locality(&zone("nl-ams"), LocalityKind::Zone), None);
}

#[rstest]
#[case("5m", "300s")]
#[case("1h30m", "5400s")]
#[case("soon", "soon")]
fn durations_normalize_to_seconds(#[case] raw: &str, #[case] expected: &str) {
    assert_eq!(normalize_duration(&Value::from(raw)), Value::from(expected));
}

#[rstest]
fn duration_validator_reports_the_parse_error() {
    let err = validate_duration(&Value::from("-5s")).expect_err("negative");
    assert!(err.contains("must not be negative"), "{err}");
}

#[rstest]
#[case(30, Ok(Some(30)))]
#[case(-1, Err(ExpandError::OutOfRange { attribute: String::from("port"), value: -1 }))]
fn unsigned_fields_reject_negative_values(
    #[case] value: i64,
    #[case] expected: Result<Option<u32>, ExpandError>,
) {
    let mut attrs = Attributes::new();
    attrs.set("port", value);
    assert_eq!(expand_u32(&attrs, "port"), expected);
}

#[rstest]
#[case("fr-par-1/22222222-2222-2222-2222-222222222222")]
#[case("fr-par/22222222-2222-2222-2222-222222222222")]
#[case("22222222-2222-2222-2222-222222222222")]
fn references_normalize_to_their_uuid(#[case] raw: &str) {
    assert_eq!(normalize_reference(&Value::from(raw)), Value::from(NETWORK));
}
