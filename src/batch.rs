use tracing::info;

use crate::config::{BatchConfig, SimulationDefaults};
use crate::error::CdosError;
use crate::experiment::{run_experiment, RunOutput};

/// Runs one experiment per packet length, in order, all with the batch seed.
/// The first failing run ends the batch; earlier runs keep their output.
pub fn run_batch(batch: &BatchConfig, defaults: &SimulationDefaults) -> Result<Vec<RunOutput>, CdosError> {
    info!(
        seed = batch.seed,
        runs = batch.packet_lengths.len(),
        root = %defaults.output_root.display(),
        "batch started"
    );

    let mut outputs = Vec::with_capacity(batch.packet_lengths.len());
    for &packet_length in &batch.packet_lengths {
        let output = run_experiment(&batch.experiment(packet_length), defaults, batch.seed)?;
        info!(
            packet_length = output.config.packet_length,
            dir = %output.dir.display(),
            prefix = %output.stats_prefix.display(),
            artifacts = output.artifacts.len(),
            events = output.events_handled,
            tx_packets = output.totals.iter().map(|t| t.tx_packets).sum::<u64>(),
            "run complete"
        );
        outputs.push(output);
    }

    info!(runs = outputs.len(), "batch complete");
    Ok(outputs)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ConfigError;
    use std::path::Path;
    use tracing_test::traced_test;

    fn fast_defaults(root: &Path) -> SimulationDefaults {
        SimulationDefaults {
            ordinary_start_s: 0.1,
            attack_start_s: 1.0,
            attack_stop_s: 2.0,
            output_root: root.to_path_buf(),
            ..SimulationDefaults::default()
        }
    }

    fn short_batch(packet_lengths: Vec<u32>) -> BatchConfig {
        BatchConfig {
            duration_s: 3.0,
            packet_lengths,
            ..BatchConfig::default()
        }
    }

    #[traced_test]
    #[test]
    fn demonstration_lengths_give_two_distinct_runs() {
        let root = tempfile::tempdir().unwrap();
        let outputs = run_batch(&short_batch(vec![200, 1500]), &fast_defaults(root.path())).unwrap();

        assert_eq!(outputs.len(), 2);
        let names: Vec<String> = outputs
            .iter()
            .map(|o| o.dir.file_name().unwrap().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, vec!["u_0=1.00rho=0.14T=200", "u_0=1.00rho=0.14T=1500"]);
        assert!(outputs.iter().all(|o| o.dir.is_dir() && o.artifacts.len() == 6));
        // same load, smaller packets: more of them
        assert!(outputs[0].totals[4].tx_packets > outputs[1].totals[4].tx_packets);
        assert!(logs_contain("batch complete"));
    }

    #[test]
    fn failing_run_stops_the_batch() {
        let root = tempfile::tempdir().unwrap();
        let err = run_batch(&short_batch(vec![200, 0, 1500]), &fast_defaults(root.path())).unwrap_err();

        assert!(matches!(err, CdosError::Config(ConfigError::NonPositivePacketLength)));
        assert!(root.path().join("u_0=1.00rho=0.14T=200").is_dir());
        assert!(!root.path().join("u_0=1.00rho=0.14T=1500").exists());
    }

    #[test]
    fn empty_batch_runs_nothing() {
        let root = tempfile::tempdir().unwrap();
        let outputs = run_batch(&short_batch(Vec::new()), &fast_defaults(root.path())).unwrap();
        assert!(outputs.is_empty());
    }
}
