use anyhow::{Result, bail};
use log::{error, info};

use super::command::{Cli, InfoArgs};
use crate::input::load_input;
use mediafmt::parser::Container;
use mediafmt::render;

pub fn cmd_info(args: &InfoArgs, cli: &Cli) -> Result<()> {
    let mut failed = 0usize;
    for input in &args.inputs {
        info!("inspecting {}", input.display());

        let result = inspect(input, args.format.container());
        match result {
            Ok(dump) => {
                println!("{}", input.display());
                println!("{dump}");
            }
            Err(e) => {
                if cli.strict {
                    return Err(e);
                }
                error!("{}: {e:#}", input.display());
                failed += 1;
            }
        }
    }

    if failed > 0 {
        bail!("{failed} of {} inputs failed", args.inputs.len());
    }
    Ok(())
}

fn inspect(input: &std::path::Path, forced: Option<Container>) -> Result<String> {
    let (container, data) = load_input(input, forced)?;
    info!("detected {container} input ({} bytes)", data.len());

    let mut parser = container.parser(data);
    parser.parse()?;
    Ok(render::render(&parser.records()))
}
