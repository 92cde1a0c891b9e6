use haberman_survival::{
    config::FilterConfig,
    dataset::{Cohort, Covariate, PatientRecord},
    logrank_test, proportional_hazard_test, CoxModel, KaplanMeier, TimeTransform,
};
use ndarray::Array2;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    println!("Haberman Survival - Basic Usage Example");
    println!("=======================================\n");

    // age, years of follow-up, positive nodes, status (1 = survived, 2 = died)
    let rows = [
        (30.0, 5.0, 0.0, 1.0),
        (34.0, 2.0, 8.0, 2.0),
        (38.0, 6.0, 1.0, 1.0),
        (42.0, 1.0, 12.0, 2.0),
        (45.0, 3.0, 2.0, 2.0),
        (47.0, 7.0, 0.0, 1.0),
        (52.0, 4.0, 6.0, 2.0),
        (55.0, 8.0, 3.0, 1.0),
        (58.0, 2.0, 9.0, 2.0),
        (63.0, 5.0, 4.0, 1.0),
        (66.0, 1.0, 20.0, 2.0),
        (70.0, 6.0, 1.0, 1.0),
        (74.0, 3.0, 7.0, 2.0),
        (78.0, 9.0, 0.0, 1.0),
        (83.0, 4.0, 2.0, 1.0),
        (55.0, 1.0, 5.0, 2.0),
        (49.0, 5.0, 14.0, 1.0),
        (61.0, 2.0, 0.0, 2.0),
        (19.0, 4.0, 1.0, 1.0), // dropped: outside the age bands
        (50.0, 3.0, 35.0, 2.0), // dropped: too many nodes
    ];
    let records: Vec<PatientRecord> = rows
        .iter()
        .map(|&(age, year, nodes, status)| PatientRecord::new(age, year, nodes, status))
        .collect();

    let cohort = Cohort::from_records(&records, &FilterConfig::default());
    println!("Cohort: {} patients kept, {} dropped\n", cohort.len(), cohort.dropped());

    let covariates = [Covariate::Age, Covariate::Nodes];
    let data = cohort.to_survival_data(&covariates)?;

    // Example 1: overall Kaplan-Meier curve
    println!("Example 1: Kaplan-Meier");
    println!("-----------------------");
    let overall = KaplanMeier::fit(&data, "all patients", 0.05)?;
    overall.print();
    println!("Median survival: {:?}\n", overall.median_survival());

    // Example 2: stratified curves and the log-rank test
    println!("Example 2: Nodes groups");
    println!("-----------------------");
    let nodes_groups = cohort.nodes_groups();
    for (group, curve) in KaplanMeier::fit_by_group(&data, &nodes_groups, 0.05)? {
        println!("{group}: n = {}, S(3) = {:.3}", curve.n_samples(), curve.survival_at(3.0));
    }
    let logrank = logrank_test(&data, &nodes_groups)?;
    logrank.print();
    println!();

    // Example 3: Cox regression on age + nodes
    println!("Example 3: Cox Regression");
    println!("-------------------------");
    let mut model = CoxModel::new()
        .with_max_iterations(1000)
        .with_feature_names(covariates.iter().map(|c| c.name().to_string()).collect());
    model.fit(&data)?;
    model.summary()?.print();
    println!();
    model.metrics(&data)?.print();
    println!();

    // Example 4: proportional hazards check
    let (ph_test, _) = proportional_hazard_test(&model, &data, TimeTransform::Rank)?;
    ph_test.print();
    println!();

    // Example 5: survival for two patient profiles
    println!("Example 5: Predictions");
    println!("----------------------");
    let profiles = Array2::from_shape_vec((2, 2), vec![45.0, 2.0, 65.0, 10.0])?;
    let (timeline, survival) = model.predict_survival_function(profiles.view())?;
    for (label, row) in ["age 45, 2 nodes", "age 65, 10 nodes"].iter().zip(survival.rows()) {
        let last = row.len() - 1;
        println!("{label}: S({:.0}) = {:.3}", timeline[last], row[last]);
    }

    Ok(())
}
