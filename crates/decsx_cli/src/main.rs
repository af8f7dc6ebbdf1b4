use std::io::Write;
use std::path::Path;

use clap::{CommandFactory, Parser};
use decsx_lib::{Container, DecsxError, ExportOptions, ImageMetadata, ListingLayout};

use crate::cli::{Cli, ListingLayoutCli, TopLevel};

mod cli;

fn load(input: &Path) -> Result<(Container, ImageMetadata), DecsxError> {
    let container = Container::open(input)?;
    let metadata = ImageMetadata::decode(&container);
    Ok((container, metadata))
}

fn export(input: &Path, output: &Path, options: ExportOptions) -> Result<(), DecsxError> {
    let (container, metadata) = load(input)?;
    print!("{}", metadata.globals);

    let summary = decsx_lib::export_container(&container, &metadata, output, &options, |p| {
        eprint!("\rParse functions: {}/{}", p.launched, p.total);
        let _ = std::io::stderr().flush();
    })?;

    if let Some(report) = summary.dispatch {
        eprintln!();
        if !report.failures.is_empty() {
            log::warn!("{} of {} function(s) failed to decompile", report.failures.len(), report.launched);
        }
    }
    log::info!("export finished: {}", output.display());
    Ok(())
}

fn info(input: &Path, functions: bool, strings: bool, globals: bool, links: bool) -> Result<(), DecsxError> {
    let (container, metadata) = load(input)?;
    let all = !(functions || strings || globals || links);

    println!("sections:");
    for section in container.sections() {
        println!("\t{:?}\t{} bytes", section.id().to_string(), section.payload().len());
    }
    if all || functions {
        print!("{}", metadata.functions);
    }
    if all || strings {
        print!("{}", metadata.strings);
    }
    if all || globals {
        print!("{}", metadata.globals);
    }
    if all || links {
        print!("{}", metadata.links);
    }
    Ok(())
}

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();

    let result = match cli.command {
        Some(TopLevel::Export {
            input,
            output,
            jobs,
            layout,
            no_sections,
            strict,
        }) => {
            let layout = match layout {
                ListingLayoutCli::PerFunction => ListingLayout::PerFunction,
                ListingLayoutCli::Single => ListingLayout::Single,
            };
            export(
                &input,
                &output,
                ExportOptions {
                    jobs,
                    layout,
                    export_sections: !no_sections,
                    strict,
                },
            )
        }
        Some(TopLevel::Info {
            input,
            functions,
            strings,
            globals,
            links,
        }) => info(&input, functions, strings, globals, links),
        Some(TopLevel::Completion { shell }) => {
            let mut cmd = Cli::command();
            let bin_name = cmd.get_name().to_string();
            clap_complete::generate(shell, &mut cmd, bin_name, &mut std::io::stdout());
            Ok(())
        }
        None => {
            let _ = Cli::command().print_help();
            Ok(())
        }
    };

    if let Err(e) = result {
        eprintln!("error: {e}");
        std::process::exit(1);
    }
}
