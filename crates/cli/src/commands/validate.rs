//! `validate` command: check a configuration file without running.

use anyhow::Result;

use config_loader::ConfigLoader;

use crate::cli::ValidateArgs;

pub fn execute(args: ValidateArgs) -> Result<()> {
    let result = ConfigLoader::load_from_path(&args.config);

    if args.json {
        let report = match &result {
            Ok(_) => serde_json::json!({ "valid": true }),
            Err(error) => serde_json::json!({ "valid": false, "error": error.to_string() }),
        };
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        match &result {
            Ok(_) => println!("{}: OK", args.config.display()),
            Err(error) => println!("{}: INVALID\n  {error}", args.config.display()),
        }
    }

    result.map(|_| ()).map_err(Into::into)
}
