//! bpy2obj: run one scene script offline and write the exported OBJ

use anyhow::{Context, Result};
use bpy2obj::{
    convert, execute, normalize_script, render_wrapper, EngineConfig, ExportOptions, LuaEngine,
    WrapperRequest,
};
use clap::Parser;
use std::fs;
use std::io::Write;
use std::path::PathBuf;
use std::time::Duration;

#[derive(Parser, Debug)]
#[command(name = "bpy2obj")]
#[command(about = "Run a scene script and export the result as OBJ")]
#[command(version)]
struct Args {
    /// Input script file
    #[arg(short, long)]
    input: PathBuf,

    /// Output OBJ file
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Only run the script and print the scene summary as JSON
    #[arg(long)]
    validate: bool,

    /// Print the Blender wrapper for this script instead of running it
    #[arg(long)]
    emit_wrapper: bool,

    /// Split polygons into triangles
    #[arg(long)]
    triangulate: bool,

    /// Leave out materials
    #[arg(long)]
    no_materials: bool,

    /// Leave out vertex normals
    #[arg(long)]
    no_normals: bool,

    /// Script timeout in seconds
    #[arg(long, default_value = "60")]
    timeout: u64,

    /// Write OBJ to stdout instead of a file
    #[arg(long)]
    stdout: bool,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt().with_writer(std::io::stderr).init();
    let args = Args::parse();

    let script = fs::read_to_string(&args.input)
        .with_context(|| format!("Failed to read input file: {:?}", args.input))?;

    let options = ExportOptions {
        include_materials: !args.no_materials,
        include_normals: !args.no_normals,
        triangulate: args.triangulate,
    };

    if args.emit_wrapper {
        let output_path = args.output.clone().unwrap_or_else(|| PathBuf::from("model.obj"));
        let script = normalize_script(&script);
        let wrapper = render_wrapper(&WrapperRequest {
            script: &script,
            output_path: Some(&output_path),
            options,
        })
        .context("Failed to render wrapper")?;
        println!("{}", wrapper);
        return Ok(());
    }

    let mut engine = LuaEngine::new(EngineConfig {
        timeout: Duration::from_secs(args.timeout),
        ..EngineConfig::default()
    })?;

    if args.validate {
        let result = execute(&mut engine, &script);
        println!("{}", serde_json::to_string_pretty(&result)?);
        if !result.success {
            anyhow::bail!("Script failed");
        }
        return Ok(());
    }

    let bytes = convert(&mut engine, &script, &options).context("Conversion failed")?;

    if args.stdout {
        std::io::stdout().write_all(&bytes)?;
    } else {
        let output = args
            .output
            .context("--output is required unless --stdout or --validate is given")?;
        fs::write(&output, &bytes)
            .with_context(|| format!("Failed to write output file: {:?}", output))?;
        eprintln!("Wrote {} bytes to {:?}", bytes.len(), output);
    }

    Ok(())
}
