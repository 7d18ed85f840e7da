fn main() {
    divisibill_licensing::run();
}
