fn main() -> anyhow::Result<()> {
    fusevars::runner::run()
}
