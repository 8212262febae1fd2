/*!
# Saving Traces to CSV

Enable via the `csv` feature.
*/

use std::error::Error;
use std::fs::File;

use csv::Writer;

use crate::core::Trace;
use crate::stats::flatten;

/**
Saves a trace as a CSV file.

The header row is `"iteration"` followed by [`Trace::column_names`]. Each
subsequent row holds one snapshot, starting with the initial state at
iteration 0.

# Examples

```rust
use mixture_mcmc::core::Trace;
use mixture_mcmc::io::csv::save_csv;
use mixture_mcmc::model::Parameters;
use ndarray::array;

let mut trace = Trace::default();
trace.push(&Parameters::new(array![0.0, 1.0], array![1.0, 1.0], array![0.5, 0.5]));
save_csv(&trace, "/tmp/trace.csv")?;
# Ok::<(), Box<dyn std::error::Error>>(())
```
*/
pub fn save_csv(trace: &Trace, filename: &str) -> Result<(), Box<dyn Error>> {
    let mut wtr = Writer::from_writer(File::create(filename)?);

    let mut header = vec!["iteration".to_string()];
    header.extend(trace.column_names());
    wtr.write_record(&header)?;

    for (iteration, params) in trace.iter().enumerate() {
        let mut row = vec![iteration.to_string()];
        row.extend(flatten(params).iter().map(|v| v.to_string()));
        wtr.write_record(&row)?;
    }

    wtr.flush()?;
    Ok(())
}
