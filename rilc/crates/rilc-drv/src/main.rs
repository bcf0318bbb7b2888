use std::process::exit;

fn main() {
    exit(rilc_drv::main());
}
