use dashsync_config::DashboardConfig;

pub fn run(config: &DashboardConfig) -> Result<(), Box<dyn std::error::Error>> {
    let effective = config.effective();

    // Print as YAML for readability
    let yaml = serde_yaml::to_string(&effective)?;
    println!("{}", yaml);

    Ok(())
}
