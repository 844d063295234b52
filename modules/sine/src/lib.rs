// Sine oscillator built as a loadable module library (libsine)

ugen_bridge::export_dsp_module!(ugen_bridge::sdk::sine::Sine);
