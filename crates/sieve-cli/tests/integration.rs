use sieve_cli::input::Input;
use sieve_cli::runner::Runner;
use std::fmt::Write;

fn matches_file() -> String {
    let mut tsv = String::from(
        "file\tscan\tscore\tdelta_score\tprecursor_ppm\tnotch\tdigestion_agent\tfull_sequence\tdecoy\n",
    );
    for i in 0..300usize {
        let decoy = i % 4 == 3;
        let score = if decoy { 20.0 - i as f64 / 10.0 } else { 100.0 - i as f64 / 10.0 };
        let notch = if i % 5 == 0 { String::new() } else { "0".into() };
        let (sequence, flags) = match i {
            7 => ("PEPTIDE|EDITPEP".to_string(), "N|Y"),
            _ if decoy => (format!("KEDIT{}PEP", i), "Y"),
            _ => (format!("PEP{}TIDEK", i % 250), "N"),
        };
        writeln!(
            tsv,
            "a.mzML\t{}\t{}\t1.5\t{}\t{}\ttrypsin\t{}\t{}",
            i,
            score,
            (i % 7) as f64 - 3.0,
            notch,
            sequence,
            flags
        )
        .unwrap();
    }
    tsv
}

#[test]
fn integration() -> anyhow::Result<()> {
    let dir = std::env::temp_dir().join(format!("sieve-cli-{}", std::process::id()));
    std::fs::create_dir_all(&dir)?;

    let tsv = dir.join("matches.tsv");
    std::fs::write(&tsv, matches_file())?;

    let parameters = dir.join("parameters.json");
    let output = dir.join("out");
    std::fs::write(
        &parameters,
        serde_json::json!({
            "fdr": {
                "num_notches": 1,
                "force_large_sample": true,
                "file_parameters": [{ "file": "a.mzML", "precursor_tolerance_ppm": 10.0 }]
            },
            "output_directory": output,
            "matches_paths": [tsv],
        })
        .to_string(),
    )?;

    let search = Input::load(&parameters)?.build()?;
    assert_eq!(search.fdr.num_notches, 1);
    assert!(search.fdr.force_large_sample);

    let result = Runner::new(search).run()?;
    assert!(result.complete);
    assert_eq!(result.partitions.len(), 1);
    assert_eq!(result.partitions[0].psms, 300);
    assert!(result.passing_psms > 0);

    let mut rdr = csv::ReaderBuilder::new()
        .delimiter(b'\t')
        .from_path(output.join("results.sieve.tsv"))?;
    let headers = rdr.headers()?.clone();
    assert_eq!(&headers[0], "file");
    assert_eq!(&headers[13], "q_value");

    let rows = rdr.records().collect::<Result<Vec<_>, _>>()?;
    assert_eq!(rows.len(), 300);

    let mut last = 0.0;
    for row in &rows {
        let q: f64 = row[13].parse()?;
        assert!((0.0..=1.0).contains(&q));
        assert!(q >= last);
        last = q;
    }

    let results: serde_json::Value =
        serde_json::from_slice(&std::fs::read(output.join("results.json"))?)?;
    assert_eq!(results["analysis"]["complete"], true);
    assert_eq!(results["search"]["output_paths"].as_array().map(|a| a.len()), Some(2));

    std::fs::remove_dir_all(&dir).ok();
    Ok(())
}
