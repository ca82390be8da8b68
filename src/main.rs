use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;

use forest_exec::geodesy::{pt_tm06, AreaCalculator, GeodesicAreaCalculator, Geometry};
use forest_exec::{config, init_config, init_telemetry, Scenario};

#[derive(Parser)]
#[command(name = "forest-exec")]
#[command(about = "Execution-sheet workflow engine for forestry operations")]
#[command(long_about = "forest-exec tracks the execution of forestry worksheets: operators start and stop \
                       work on land parcels, finished parcels are credited with their geodesic area and \
                       progress rolls up to the operation and the sheet.")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print the geodesic area, in hectares, of a GeoJSON polygon in PT-TM06 metres
    Area {
        /// Path to a GeoJSON Polygon or MultiPolygon geometry
        file: PathBuf,
    },
    /// Convert a PT-TM06 point to geographic longitude and latitude
    Project {
        /// Easting in metres
        #[arg(allow_hyphen_values = true)]
        x: f64,
        /// Northing in metres
        #[arg(allow_hyphen_values = true)]
        y: f64,
    },
    /// Replay a scenario file against in-memory collaborators and print the report
    Simulate {
        /// Path to the scenario JSON file
        scenario: PathBuf,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = config()?;
    init_telemetry(&config.observability)?;
    init_config()?;

    match cli.command {
        Commands::Area { file } => {
            let json = std::fs::read_to_string(&file)
                .with_context(|| format!("Failed to read {}", file.display()))?;
            let geometry = Geometry::from_json(&json)?;
            let calculator = GeodesicAreaCalculator::new(config.geometry.strict);
            let area = calculator.area_ha(&geometry)?;
            println!("{area:.6}");
            Ok(())
        }
        Commands::Project { x, y } => {
            let (lon, lat) = pt_tm06().inverse(x, y);
            println!("{lon:.9} {lat:.9}");
            Ok(())
        }
        Commands::Simulate { scenario } => tokio::runtime::Runtime::new()?.block_on(async {
            let loaded = Scenario::from_file(&scenario)
                .await
                .with_context(|| format!("Failed to load scenario {}", scenario.display()))?;
            let report = loaded.run(config).await?;
            println!("{}", serde_json::to_string_pretty(&report)?);
            Ok(())
        }),
    }
}
