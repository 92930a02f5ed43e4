use std::time::Duration;
use vbench_harness::config::{Config, EncoderKind, QualityMetricCfg};
use vbench_harness::error::BenchError;

#[test]
fn parse_example_config() {
    let raw = include_str!("../vbench.example.toml");
    let cfg: Config = toml::from_str(raw).expect("parse TOML");
    assert!(cfg.sweep.concurrency_limit >= 1);
    assert!(!cfg.paths.out_dir.is_empty());
    assert_eq!(cfg.encoder.kind, EncoderKind::Ffmpeg);
    assert_eq!(cfg.quality.metric, QualityMetricCfg::Psnr);
    assert!(cfg.video_dir().ends_with("videos/crf18"));

    let names: Vec<String> = cfg.all_presets().into_iter().map(|p| p.name).collect();
    assert_eq!(names, vec!["live", "vod", "popular", "crf23-fast"]);
}

#[test]
fn example_config_builds_a_sweep() {
    let raw = include_str!("../vbench.example.toml");
    let cfg: Config = toml::from_str(raw).expect("parse TOML");

    let sweep = cfg
        .sweep_configuration(vec!["a.mkv".into(), "b.mkv".into()], Some(4), None)
        .unwrap();
    assert_eq!(sweep.concurrency_limit(), 4);
    assert_eq!(sweep.baseline(), Some("vod"));
    assert_eq!(sweep.job_timeout(), Duration::from_secs(3600));

    let vod = sweep.presets().iter().find(|p| p.name == "vod").unwrap();
    assert!(vod.is_two_pass());
}

#[test]
fn empty_config_uses_defaults() {
    let cfg: Config = toml::from_str("").expect("parse TOML");
    assert_eq!(cfg.sweep.concurrency_limit, 1);
    assert!(cfg.global.keep_artifacts);
    assert_eq!(cfg.all_presets().len(), 3);

    let sweep = cfg.sweep_configuration(vec!["a.mkv".into()], None, None).unwrap();
    assert_eq!(sweep.baseline(), None);
}

#[test]
fn upload_only_uses_lossless_corpus() {
    let cfg: Config = toml::from_str("[sweep]\nscenarios = [\"upload\"]\nconcurrency_limit = 1\njob_timeout_seconds = 60\ndeadline_seconds = 0\nbaseline = \"\"\n")
        .expect("parse TOML");
    assert!(cfg.video_dir().ends_with("videos/crf0"));
}

#[test]
fn zero_concurrency_override_is_rejected() {
    let cfg = Config::default();
    let res = cfg.sweep_configuration(vec!["a.mkv".into()], Some(0), None);
    assert!(matches!(res, Err(BenchError::SweepConfigurationInvalid(_))));
}
