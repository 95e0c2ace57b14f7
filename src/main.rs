fn main() {
    pbf_fluid::start();
}
