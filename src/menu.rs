use std::io::{self, Write};

pub fn show_menu() {
    println!("\n===========================================");
    println!("Mini Tensile Testing Rig");
    println!("===========================================");
    println!("Select an option:");
    println!("1. Pull Test Demo (simulated rig)");
    println!("2. Pull Test With Operator Abort");
    println!("3. Characterisation Mode Demo");
    println!("4. Exit");
    println!("===========================================");
    print!("Choice (1-4): ");
    io::stdout().flush().unwrap();
}

pub fn get_user_choice() -> Result<u32, std::num::ParseIntError> {
    let mut input = String::new();
    io::stdin().read_line(&mut input).unwrap();
    input.trim().parse::<u32>()
}

pub fn wait_for_enter() {
    println!("\nPress Enter to return to menu...");
    let mut input = String::new();
    io::stdin().read_line(&mut input).unwrap();
}
