fn main() {
    if let Err(e) = recipe_chef_lib::run() {
        log::error!("Recipe Chef stopped: {}", e);
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}
