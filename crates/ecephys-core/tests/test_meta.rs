mod common;

use approx::assert_relative_eq;
use ecephys_core::meta::{read_ephys_params, EphysParams, SpikeGlxMeta};

#[test]
fn test_np1_meta() {
    let params = SpikeGlxMeta::parse(common::NP1_META).ephys_params().unwrap();
    assert_eq!(params.probe_type, "NP1");
    assert_relative_eq!(params.sample_rate, 30000.0);
    assert_eq!(params.num_channels, 385);
    assert_eq!(params.reference_channels, vec![191]);
    assert_relative_eq!(params.uv_per_bit, 2.34375);
    assert!(params.use_geometry);
}

#[test]
fn test_np2_meta_uses_fixed_gain() {
    let meta = "\
imDatPrb_type=21
imSampRate=30000.1
nSavedChans=385
imAiRangeMax=0.5
imMaxInt=8192
~imroTbl=(21,384)(0 1 0 0)(1 1 0 1)
";
    let params = SpikeGlxMeta::parse(meta).ephys_params().unwrap();
    assert_eq!(params.probe_type, "NP21");
    assert_eq!(params.reference_channels, vec![127]);
    assert_relative_eq!(params.uv_per_bit, 1e6 * 0.5 / 8192.0 / 80.0);
    assert!(!params.use_geometry);
}

#[test]
fn test_probe_type_without_type_key() {
    let meta = SpikeGlxMeta::parse("imSampRate=30000\n");
    assert_eq!(meta.probe_type(), "3A");
    assert_eq!(meta.get("imSampRate"), Some("30000"));
}

#[test]
fn test_meta_missing_required_key() {
    let meta = SpikeGlxMeta::parse("imDatPrb_type=0\nnSavedChans=385\n");
    assert!(meta.ephys_params().is_err());
}

#[test]
fn test_read_from_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("rec_g0_t0.imec0.ap.meta");
    std::fs::write(&path, common::NP1_META).unwrap();
    let params = read_ephys_params(&path).unwrap();
    assert_eq!(params.num_channels, 385);
}

#[test]
fn test_absent_meta_falls_back_to_defaults() {
    let dir = tempfile::tempdir().unwrap();
    let params = read_ephys_params(&dir.path().join("missing.ap.meta")).unwrap();
    assert_eq!(params, EphysParams::default());
    assert_eq!(params.probe_type, "NP1");
}
