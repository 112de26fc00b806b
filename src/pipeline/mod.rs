pub mod windowing;
pub mod structuring;
pub mod batch_extraction; // Windower → Invoker → Reducer → Parser, per patient
pub mod import; // Patient documents from an input directory
pub mod export;
pub mod diagnostic; // Prompt/response dump (pipeline.dump_dir or EHR_EXTRACT_DUMP_DIR)
pub mod processor;
