use std::{env, fs, path::PathBuf, process::Command};

#[test]
fn basic_workflow() {
    let test_dir = PathBuf::from(env!("CARGO_TARGET_TMPDIR")).join("basic_workflow");

    fs::remove_dir_all(&test_dir).ok();
    fs::create_dir(&test_dir).expect("failed to create test directory");

    let config_path = test_dir.join("config.toml");
    let config_contents = String::new()
        + "[run]\n"
        + "tf = 20.0\n"
        + "time_sampling = 5\n"
        + "progress_every = 50\n"
        + "\n"
        + "[[setups]]\n"
        + "name = \"vb\"\n"
        + "num_loci = 5\n"
        + "possible_alleles = \"ATCG\"\n"
        + "contact_rate_host_vector = 1.0\n"
        + "[setups.host]\n"
        + "mean_inoculum = 5.0\n"
        + "recovery_rate = 0.1\n"
        + "mutation_rate = 0.05\n"
        + "[setups.vector]\n"
        + "mean_inoculum = 5.0\n"
        + "recovery_rate = 0.1\n"
        + "\n"
        + "[[populations]]\n"
        + "id = \"A\"\n"
        + "setup = \"vb\"\n"
        + "num_hosts = 10\n"
        + "num_vectors = 10\n"
        + "\n"
        + "[[populations]]\n"
        + "id = \"B\"\n"
        + "setup = \"vb\"\n"
        + "num_hosts = 10\n"
        + "num_vectors = 10\n"
        + "\n"
        + "[[links]]\n"
        + "kind = \"migration\"\n"
        + "individuals = \"host\"\n"
        + "from = \"A\"\n"
        + "to = \"B\"\n"
        + "rate = 0.05\n"
        + "\n"
        + "[[pathogens]]\n"
        + "population = \"A\"\n"
        + "individuals = \"host\"\n"
        + "genomes = { AAAAA = 3 }\n"
        + "\n"
        + "[[interventions]]\n"
        + "time = 10.0\n"
        + "action = { type = \"treat\", population = \"A\", individuals = \"host\", "
        + "fraction = 0.5, resistance = [\"TT\"] }\n";

    fs::write(&config_path, config_contents).expect("failed to write config file");

    fn run_bin(args: &[&str]) -> bool {
        let bin = PathBuf::from(env!("CARGO_BIN_EXE_contagium"));

        let output = Command::new(bin)
            .args(args)
            .output()
            .expect("failed to execute command");

        let stdout_str =
            std::str::from_utf8(&output.stdout).expect("failed to convert stdout to string");
        let stderr_str =
            std::str::from_utf8(&output.stderr).expect("failed to convert stderr to string");

        if !output.status.success() {
            eprintln!(
                "binary failed with {args:?}\nstdout:\n{stdout_str}\nstderr:\n{stderr_str}\n"
            );
        }
        output.status.success()
    }

    let config_str = config_path
        .to_str()
        .expect("failed to convert config path to string");

    assert!(run_bin(&["--config", config_str, "check"]));
    assert!(run_bin(&["--config", config_str, "run", "--runs", "3", "--seed", "11"]));

    let bad_config_path = test_dir.join("bad.toml");
    fs::write(&bad_config_path, "[run]\ntf = 1.0\n").expect("failed to write config file");
    let bad_config_str = bad_config_path
        .to_str()
        .expect("failed to convert config path to string");
    assert!(!run_bin(&["--config", bad_config_str, "check"]));

    fs::remove_dir_all(&test_dir).ok();
}
