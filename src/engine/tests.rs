//! Engine Adapter Tests
//!
//! Exercises program-module loading, the bundled reference interpreter
//! (determinism, bound confinement, offload harvesting) and the per-rank
//! output handler.

#[cfg(test)]
mod tests {
    use crate::config::{Options, SearchPolicy};
    use crate::engine::module::{read_environ_file, ProgramModule};
    use crate::engine::output::{format_elapsed, OutputHandler};
    use crate::engine::sim::SimInterpreter;
    use crate::engine::{
        FunctionLocation, Interpreter, InterpreterConfig, PathRecord, Prefix, StepOutcome,
        TestArtifacts,
    };
    use crate::fleet::types::Rank;
    use clap::Parser;
    use std::collections::BTreeSet;

    fn module_from_bytes(bytes: &[u8]) -> ProgramModule {
        ProgramModule {
            path: "prog.bc".into(),
            bytes: bytes.to_vec(),
            entry_point: "main".to_string(),
            linked_libraries: Vec::new(),
            argv: vec!["prog.bc".to_string()],
            environ: Vec::new(),
        }
    }

    fn sim_for(bytes: &[u8]) -> SimInterpreter {
        SimInterpreter::new(&module_from_bytes(bytes), &InterpreterConfig::default())
    }

    /// Finds a program whose tree satisfies `pred`, so shape-dependent
    /// tests stay deterministic without pinning hash values.
    fn find_module(pred: impl Fn(&[u8]) -> bool) -> Vec<u8> {
        for i in 0..512u32 {
            let bytes = format!("test program {}", i).into_bytes();
            if pred(&bytes) {
                return bytes;
            }
        }
        panic!("no candidate program produced the required tree shape");
    }

    fn harvest_at(sim: &mut SimInterpreter, depth: u32) -> (Vec<Prefix>, Vec<PathRecord>) {
        sim.set_depth_bound(depth);
        let mut completed = Vec::new();
        let prefixes = sim
            .run_harvest(&mut |record| completed.push(record))
            .unwrap();
        (prefixes, completed)
    }

    /// Steps a configured engine to exhaustion, collecting completions.
    fn explore(sim: &mut SimInterpreter) -> Vec<Prefix> {
        let mut paths = Vec::new();
        loop {
            match sim.step().unwrap() {
                StepOutcome::Progress => {}
                StepOutcome::PathComplete(record) => paths.push(record.path),
                StepOutcome::Bug(bug) => paths.push(bug.path),
                StepOutcome::Exhausted => return paths,
            }
        }
    }

    // ============================================================
    // Program module loading
    // ============================================================

    #[test]
    fn missing_bitcode_is_a_load_error() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("absent.bc");
        let opts = Options::try_parse_from([
            "symfleet",
            missing.to_str().unwrap(),
            "--output-dir",
            dir.path().join("out").to_str().unwrap(),
        ])
        .unwrap();
        assert!(ProgramModule::load(&opts).is_err());
    }

    #[test]
    fn module_load_collects_argv_and_environ() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("prog.bc");
        std::fs::write(&input, b"bitcode bytes").unwrap();
        let envfile = dir.path().join("env");
        std::fs::write(&envfile, "HOME=/tmp\n\n  PATH=/bin  \n").unwrap();

        let opts = Options::try_parse_from([
            "symfleet",
            input.to_str().unwrap(),
            "--output-dir",
            dir.path().join("out").to_str().unwrap(),
            "--environ",
            envfile.to_str().unwrap(),
            "--",
            "--sym-arg",
            "4",
        ])
        .unwrap();

        let module = ProgramModule::load(&opts).unwrap();
        assert_eq!(module.program_name(), "prog.bc");
        assert_eq!(module.argv.len(), 3);
        assert_eq!(module.argv[1], "--sym-arg");
        assert_eq!(module.environ, vec!["HOME=/tmp", "PATH=/bin"]);
    }

    #[test]
    fn environ_file_must_exist() {
        assert!(read_environ_file(std::path::Path::new("/nonexistent/env")).is_err());
    }

    // ============================================================
    // Reference interpreter: determinism and bounds
    // ============================================================

    #[test]
    fn harvest_is_deterministic_per_program() {
        let bytes = find_module(|b| !harvest_at(&mut sim_for(b), 3).0.is_empty());
        let (first, _) = harvest_at(&mut sim_for(&bytes), 3);
        let (second, _) = harvest_at(&mut sim_for(&bytes), 3);
        assert_eq!(first, second);
        assert!(!first.is_empty());
    }

    #[test]
    fn different_programs_give_different_trees() {
        let shape = |bytes: &[u8]| {
            let (prefixes, completed) = harvest_at(&mut sim_for(bytes), 6);
            let paths: Vec<Prefix> = completed.into_iter().map(|r| r.path).collect();
            (prefixes, paths)
        };
        let reference = shape(b"program one");
        let bytes = find_module(|b| shape(b) != reference);
        assert_ne!(shape(&bytes), reference);
    }

    #[test]
    fn harvested_prefixes_sit_exactly_at_the_bound() {
        let bytes = find_module(|bytes| harvest_at(&mut sim_for(bytes), 4).0.len() >= 2);
        let (prefixes, completed) = harvest_at(&mut sim_for(&bytes), 4);
        assert!(prefixes.iter().all(|p| p.len() == 4));
        assert!(completed.iter().all(|r| r.path.len() < 4));
        let unique: BTreeSet<_> = prefixes.iter().collect();
        assert_eq!(unique.len(), prefixes.len(), "no prefix is harvested twice");
    }

    #[test]
    fn prefix_task_is_confined_to_its_subtree() {
        let bytes = find_module(|bytes| harvest_at(&mut sim_for(bytes), 5).0.len() >= 2);
        let (prefixes, _) = harvest_at(&mut sim_for(&bytes), 5);
        let prefix = prefixes[0].clone();

        let mut sim = sim_for(&bytes);
        sim.set_prefix(&prefix);
        sim.set_depth_bound(3);
        let paths = explore(&mut sim);
        assert!(!paths.is_empty());
        for path in &paths {
            assert!(path.starts_with(&prefix));
            assert!(path.len() <= prefix.len() + 3);
        }
    }

    #[test]
    fn sibling_prefixes_explore_disjoint_paths() {
        let bytes = find_module(|bytes| harvest_at(&mut sim_for(bytes), 5).0.len() >= 2);
        let (prefixes, _) = harvest_at(&mut sim_for(&bytes), 5);

        let explore_under = |prefix: &Prefix| {
            let mut sim = sim_for(&bytes);
            sim.set_prefix(prefix);
            sim.set_depth_bound(0);
            explore(&mut sim).into_iter().collect::<BTreeSet<_>>()
        };
        let first = explore_under(&prefixes[0]);
        let second = explore_under(&prefixes[1]);
        assert!(first.is_disjoint(&second));
    }

    // ============================================================
    // Reference interpreter: offload harvesting
    // ============================================================

    /// Steps the donor until it can give something away, then steals.
    fn steal_once(donor: &mut SimInterpreter) -> Option<Prefix> {
        loop {
            if donor.frontier_len() >= 2 {
                if let Some(stolen) = donor.harvest_offload() {
                    return Some(stolen);
                }
            }
            if let StepOutcome::Exhausted = donor.step().unwrap() {
                return None;
            }
        }
    }

    /// Harvests at depth 6 and prepares a donor on the first prefix;
    /// `None` when the program's tree cannot support a donation.
    fn donation_setup(bytes: &[u8]) -> Option<(Prefix, Prefix, SimInterpreter)> {
        let (prefixes, _) = harvest_at(&mut sim_for(bytes), 6);
        let prefix = prefixes.first()?.clone();
        let mut donor = sim_for(bytes);
        donor.set_prefix(&prefix);
        donor.set_depth_bound(6);
        let stolen = steal_once(&mut donor)?;
        Some((prefix, stolen, donor))
    }

    #[test]
    fn donated_subtree_is_not_explored_by_the_donor() {
        let bytes = find_module(|bytes| donation_setup(bytes).is_some());
        let (_, stolen, mut donor) = donation_setup(&bytes).expect("pred verified this program");
        assert!(stolen.len() > crate::fleet::protocol::OFFLOAD_EMPTY_THRESHOLD);

        let donor_paths = explore(&mut donor);
        for path in &donor_paths {
            assert!(
                !path.starts_with(&stolen),
                "donor re-explored the donated subtree"
            );
        }

        // The thief covers exactly the donated subtree.
        let mut thief = sim_for(&bytes);
        thief.set_prefix(&stolen);
        thief.set_depth_bound(0);
        let thief_paths = explore(&mut thief);
        assert!(!thief_paths.is_empty());
        assert!(thief_paths.iter().all(|p| p.starts_with(&stolen)));
    }

    #[test]
    fn lonely_frontier_refuses_to_donate() {
        let mut sim = sim_for(b"any program");
        assert_eq!(sim.frontier_len(), 0);
        assert!(sim.harvest_offload().is_none());
    }

    // ============================================================
    // Reference interpreter: policies and bugs
    // ============================================================

    #[test]
    fn every_policy_completes_the_same_path_set() {
        let bytes = b"policy comparison program";
        let mut reference = None;
        for policy in [
            SearchPolicy::Dfs,
            SearchPolicy::Bfs,
            SearchPolicy::Rand,
            SearchPolicy::CovNew,
        ] {
            let mut sim = sim_for(bytes);
            sim.set_search_policy(policy);
            sim.set_depth_bound(0);
            let paths: BTreeSet<_> = explore(&mut sim).into_iter().collect();
            match &reference {
                None => reference = Some(paths),
                Some(expected) => assert_eq!(&paths, expected, "{:?} diverged", policy),
            }
        }
    }

    #[test]
    fn error_location_designates_a_reachable_bug() {
        let config = InterpreterConfig {
            error_locations: vec![FunctionLocation {
                name: "crashy".to_string(),
                lines: vec![42],
            }],
            ..InterpreterConfig::default()
        };
        let module = module_from_bytes(b"buggy program");
        let mut sim = SimInterpreter::new(&module, &config);
        sim.set_depth_bound(0);

        let mut bug = None;
        loop {
            match sim.step().unwrap() {
                StepOutcome::Bug(info) => {
                    bug = Some(info);
                    break;
                }
                StepOutcome::Exhausted => break,
                _ => {}
            }
        }
        let bug = bug.expect("the designated error path is reachable");
        assert!(bug.message.contains("crashy:42"));
    }

    #[test]
    fn clean_program_reports_no_bug() {
        let mut sim = sim_for(b"clean program");
        sim.set_depth_bound(0);
        loop {
            match sim.step().unwrap() {
                StepOutcome::Bug(info) => panic!("unexpected bug: {}", info.message),
                StepOutcome::Exhausted => break,
                _ => {}
            }
        }
    }

    // ============================================================
    // Output handler
    // ============================================================

    fn artifacts_all() -> TestArtifacts {
        TestArtifacts {
            no_output: false,
            kqueries: true,
            cvcs: false,
            smt2s: false,
            cov: true,
            paths: true,
            sym_paths: false,
            test_info: true,
        }
    }

    #[test]
    fn handler_creates_the_rank_directory() {
        let dir = tempfile::tempdir().unwrap();
        let base = format!("{}/run", dir.path().display());
        let handler =
            OutputHandler::create(&base, Rank(3), "prog.bc", TestArtifacts::default()).unwrap();
        assert_eq!(handler.output_dir(), std::path::Path::new(&format!("{}3", base)));
        assert!(handler.output_dir().join("info").exists());
        assert!(handler.output_dir().join("messages.txt").exists());
        assert!(handler.output_dir().join("warnings.txt").exists());
    }

    #[test]
    fn stale_directory_is_probed_past() {
        let dir = tempfile::tempdir().unwrap();
        let base = format!("{}/run", dir.path().display());
        std::fs::create_dir_all(format!("{}2", base)).unwrap();
        let handler =
            OutputHandler::create(&base, Rank(2), "prog.bc", TestArtifacts::default()).unwrap();
        assert_eq!(
            handler.output_dir(),
            std::path::Path::new(&format!("{}2-1", base))
        );
    }

    #[test]
    fn test_cases_are_numbered_and_flag_gated() {
        let dir = tempfile::tempdir().unwrap();
        let base = format!("{}/run", dir.path().display());
        let mut handler = OutputHandler::create(&base, Rank(2), "prog.bc", artifacts_all()).unwrap();

        let record = PathRecord {
            path: b"0101".to_vec(),
            constraints: "(assert (= b0 0))\n".to_string(),
        };
        let id = handler.process_path(&record).unwrap();
        assert_eq!(id, 1);
        assert_eq!(handler.tests_written(), 1);
        assert_eq!(handler.paths_explored(), 1);

        let out = handler.output_dir().to_path_buf();
        assert!(out.join("test000001.ktest").exists());
        assert!(out.join("test000001.kquery").exists());
        assert!(out.join("test000001.cov").exists());
        assert!(out.join("test000001.path").exists());
        assert!(out.join("test000001.info").exists());
        // Disabled artifacts are not written.
        assert!(!out.join("test000001.cvc").exists());
        assert!(!out.join("test000001.sym.path").exists());

        let blob = std::fs::read(out.join("test000001.ktest")).unwrap();
        assert_eq!(&blob[..4], b"SYMT");
        assert_eq!(&blob[8..], b"0101");

        let path_lines = std::fs::read_to_string(out.join("test000001.path")).unwrap();
        assert_eq!(path_lines, "0\n1\n0\n1\n");
    }

    #[test]
    fn no_output_suppresses_test_files() {
        let dir = tempfile::tempdir().unwrap();
        let base = format!("{}/run", dir.path().display());
        let artifacts = TestArtifacts {
            no_output: true,
            ..TestArtifacts::default()
        };
        let mut handler = OutputHandler::create(&base, Rank(2), "prog.bc", artifacts).unwrap();
        let record = PathRecord {
            path: b"01".to_vec(),
            constraints: String::new(),
        };
        handler.process_path(&record).unwrap();
        assert_eq!(handler.tests_written(), 0);
        assert_eq!(handler.paths_explored(), 1);
        assert!(!handler.output_dir().join("test000001.ktest").exists());
    }

    #[test]
    fn aux_files_sit_next_to_the_directory() {
        let dir = tempfile::tempdir().unwrap();
        let base = format!("{}/run", dir.path().display());
        let handler =
            OutputHandler::create(&base, Rank(4), "prog.bc", TestArtifacts::default()).unwrap();
        let dir_str = handler.output_dir().display().to_string();
        assert_eq!(
            handler.path_file().display().to_string(),
            format!("{}_pathFile_4", dir_str)
        );
        assert_eq!(
            handler.branch_history_file().display().to_string(),
            format!("{}_br_hist", dir_str)
        );
        assert_eq!(
            handler.log_file().display().to_string(),
            format!("{}_log_file", dir_str)
        );
    }

    #[test]
    fn elapsed_formatting_covers_days() {
        assert_eq!(format_elapsed(0), "00:00:00");
        assert_eq!(format_elapsed(3_661), "01:01:01");
        assert_eq!(format_elapsed(90_061), "1 days, 01:01:01");
    }
}
