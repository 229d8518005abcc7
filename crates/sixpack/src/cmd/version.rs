use crate::cmd::VersionArgs;
use crate::exit::{CliResult, SUCCESS};

pub fn run(args: VersionArgs) -> CliResult<i32> {
    if !args.extended {
        println!("sixpack {}", env!("CARGO_PKG_VERSION"));
        return Ok(SUCCESS);
    }

    println!("name: sixpack");
    println!("version: {}", env!("CARGO_PKG_VERSION"));
    println!(
        "target: {}",
        option_env!("SIXPACK_BUILD_TARGET").unwrap_or("unknown")
    );
    println!("target_os: {}", std::env::consts::OS);
    println!("target_arch: {}", std::env::consts::ARCH);
    println!("git_hash: {}", option_env!("GIT_HASH").unwrap_or("unknown"));
    println!("features: async={}, cli=true", cfg!(feature = "async"));
    println!(
        "defaults: max_payload={} channels={}",
        sixpack_frame::DEFAULT_MAX_PAYLOAD,
        sixpack_frame::MAX_CHANNELS
    );

    Ok(SUCCESS)
}
