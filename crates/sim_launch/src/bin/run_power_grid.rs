//! Start the power grid simulation

use sim_launch::{BuiltinPlan, LaunchArgs};

#[tokio::main]
async fn main() {
    let args: LaunchArgs = argh::from_env();
    args.init_logging();

    if let Err(e) = args.run(BuiltinPlan::PowerGrid).await {
        log::error!("{}", e);
        std::process::exit(1);
    }
}
