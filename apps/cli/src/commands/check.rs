//! check 命令
//!
//! 校验主配置和 recipe，打印解析结果与速度区间表

use anyhow::Result;
use clap::Args;
use std::path::PathBuf;
use std::process::ExitCode;

use crate::settings::{self, Overrides};

/// 配置校验参数
#[derive(Args, Debug)]
pub struct CheckCommand {
    /// 配置文件路径
    #[arg(short, long)]
    pub config: PathBuf,
}

impl CheckCommand {
    pub fn execute(&self) -> Result<ExitCode> {
        let config = settings::load_config(&self.config, &Overrides::default())?;
        let ingress = settings::ingress_config(&config.governor);
        let link = settings::link_config(&config)?;

        println!("Configuration OK: {}", self.config.display());
        println!("  ingress:   {}", ingress.transport);
        println!("  robot:     {}:{} @ {} Hz", link.host, link.port, link.frequency_hz);
        println!("  recipe:    {}", config.recipe_path.display());
        println!("    inputs:  {}", config.recipe.input_names().join(", "));
        println!("    outputs: {}", config.recipe.output_names().join(", "));
        println!(
            "  override:  {} / {} (detached -> {})",
            link.enable_field, link.fraction_field, link.detached_fraction
        );
        println!("  speed policy:");
        for line in config.policy.describe() {
            println!("    {}", line);
        }

        Ok(ExitCode::SUCCESS)
    }
}
