use crate::config::{ServeArgs, ServerConfig};
use crate::error::ServerError;

/// Разобрать конфиг, построить таблицу каналов и вывести её.
pub fn run(args: ServeArgs) -> Result<(), ServerError> {
    let (config, map) = ServerConfig::resolve(&args)?;
    println!("listen   {}", config.listen);
    println!("upstream {}", config.upstream);
    println!("dispatch {:?}", config.dispatch);
    for (real, virt) in map.iter() {
        println!("mapping {real} to {virt}");
    }
    Ok(())
}
